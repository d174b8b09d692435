//! Template compilation and execution.
//!
//! Templates are literal text interleaved with `{{ ... }}` actions. An action
//! is a pipeline of commands separated by `|`; each command is either a single
//! operand (`.field.path`, `$var.path`, a literal, a parenthesized pipeline) or
//! a function call whose arguments are operands. The value produced by one
//! command is appended as the last argument of the next.
//!
//! `{{if}}`, `{{with}}` and `{{range}}` blocks take an optional `{{else}}` and
//! close with `{{end}}`. Emptiness follows the usual rules: `false`, `0`, `null`,
//! and empty strings, arrays and objects are empty.

use serde_json::Value;

use super::functions::truthy;
use super::parse::{self, Branch, Command, Node, Operand, RangeLoop};
use super::types::{FuncMap, TemplateError, TemplateResult};

/// A compiled template, ready to render against any number of contexts.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Compile `text` under `name`.
    ///
    /// Functions are resolved against `funcs` first and the built-in set
    /// second, so callers can shadow a built-in.
    pub fn compile(name: &str, text: &str, funcs: &FuncMap) -> TemplateResult<Self> {
        Ok(Self {
            name: name.to_string(),
            nodes: parse::parse(name, text, funcs)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the template against `context`.
    ///
    /// Fields missing from the context render as empty text.
    pub fn render(&self, context: &Value) -> TemplateResult<String> {
        let mut out = String::new();
        let mut exec = Exec {
            root: context,
            vars: Vec::new(),
        };
        exec.walk(&self.nodes, context, &mut out)
            .map_err(|message| TemplateError::render(&self.name, message))?;
        Ok(out)
    }
}

/// Textual form of a value as it appears in rendered output
pub(crate) fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // Arrays and objects use their JSON representation
        _ => value.to_string(),
    }
}

/// State of a single render
struct Exec<'a> {
    /// Bound to `$`
    root: &'a Value,
    /// Variables in scope, innermost last
    vars: Vec<(String, Value)>,
}

impl Exec<'_> {
    fn walk(&mut self, nodes: &[Node], dot: &Value, out: &mut String) -> Result<(), String> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action { decl, pipeline } => {
                    let value = self.eval_pipeline(pipeline, dot)?;
                    match decl {
                        Some(name) => self.vars.push((name.clone(), value)),
                        None => out.push_str(&to_text(&value)),
                    }
                }
                Node::If(branch) => self.branch(branch, dot, out, false)?,
                Node::With(branch) => self.branch(branch, dot, out, true)?,
                Node::Range(range) => self.range(range, dot, out)?,
            }
        }
        Ok(())
    }

    fn branch(
        &mut self,
        branch: &Branch,
        dot: &Value,
        out: &mut String,
        rebinds_dot: bool,
    ) -> Result<(), String> {
        let mark = self.vars.len();
        let value = self.eval_pipeline(&branch.pipeline, dot)?;
        if let Some(name) = &branch.decl {
            self.vars.push((name.clone(), value.clone()));
        }

        let result = if !truthy(&value) {
            self.walk(&branch.otherwise, dot, out)
        } else if rebinds_dot {
            self.walk(&branch.body, &value, out)
        } else {
            self.walk(&branch.body, dot, out)
        };
        self.vars.truncate(mark);
        result
    }

    fn range(&mut self, range: &RangeLoop, dot: &Value, out: &mut String) -> Result<(), String> {
        let value = self.eval_pipeline(&range.pipeline, dot)?;
        let entries: Vec<(Value, &Value)> = match &value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            // Objects iterate in key order
            Value::Object(map) => {
                let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(b.0));
                pairs
                    .into_iter()
                    .map(|(key, item)| (Value::String(key.clone()), item))
                    .collect()
            }
            Value::Null => Vec::new(),
            other => return Err(format!("range can't iterate over {}", to_text(other))),
        };

        if entries.is_empty() {
            return self.walk(&range.otherwise, dot, out);
        }

        let mark = self.vars.len();
        for (key, item) in entries {
            if let Some(name) = &range.key {
                self.vars.push((name.clone(), key));
            }
            if let Some(name) = &range.value {
                self.vars.push((name.clone(), item.clone()));
            }
            let result = self.walk(&range.body, item, out);
            self.vars.truncate(mark);
            result?;
        }
        Ok(())
    }

    fn eval_pipeline(&self, commands: &[Command], dot: &Value) -> Result<Value, String> {
        let mut piped: Option<Value> = None;
        for command in commands {
            let value = match command {
                Command::Operand(op) => self.resolve(op, dot)?,
                Command::Call { name, func, args } => {
                    let mut argv = args
                        .iter()
                        .map(|op| self.resolve(op, dot))
                        .collect::<Result<Vec<_>, _>>()?;
                    argv.extend(piped.take());
                    func(&argv).map_err(|e| format!("error calling {name}: {e}"))?
                }
            };
            piped = Some(value);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn resolve(&self, op: &Operand, dot: &Value) -> Result<Value, String> {
        match op {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Field(path) => Ok(lookup_path(dot, path)),
            Operand::Variable { name, path } => {
                let base = if name == "$" {
                    self.root
                } else {
                    self.vars
                        .iter()
                        .rev()
                        .find(|(var, _)| var == name)
                        .map(|(_, value)| value)
                        .ok_or_else(|| format!("undefined variable {name}"))?
                };
                Ok(lookup_path(base, path))
            }
            Operand::Pipeline(pipeline) => self.eval_pipeline(pipeline, dot),
        }
    }
}

fn lookup_path(value: &Value, path: &[String]) -> Value {
    let mut current = value;
    for segment in path {
        match current.get(segment.as_str()) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(text: &str, context: Value) -> String {
        Template::compile("test", text, &FuncMap::new())
            .unwrap()
            .render(&context)
            .unwrap()
    }

    fn syntax_error(text: &str) -> String {
        match Template::compile("test", text, &FuncMap::new()) {
            Err(TemplateError::Syntax { message, .. }) => message,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(render("Annotation description", json!({})), "Annotation description");
        assert_eq!(render("", json!({})), "");
    }

    #[test]
    fn test_field_substitution() {
        let context = json!({"foo": "hello", "bar": "world"});
        assert_eq!(render("{{.bar}}-{{.foo}}", context.clone()), "world-hello");
        assert_eq!(render(":{{ .foo }}:", context), ":hello:");
    }

    #[test]
    fn test_nested_field() {
        let context = json!({"app": {"metadata": {"name": "guestbook"}}});
        assert_eq!(render("app {{.app.metadata.name}} synced", context), "app guestbook synced");
    }

    #[test]
    fn test_missing_field_renders_empty() {
        assert_eq!(render("[{{.missing}}]", json!({})), "[]");
        assert_eq!(render("[{{.a.b.c}}]", json!({"a": "scalar"})), "[]");
    }

    #[test]
    fn test_value_formatting() {
        let context = json!({
            "count": 42,
            "ratio": 0.5,
            "ok": true,
            "none": null,
            "list": [1, "two"],
            "obj": {"k": "v"}
        });
        assert_eq!(
            render("{{.count}} {{.ratio}} {{.ok}} [{{.none}}] {{.list}} {{.obj}}", context),
            r#"42 0.5 true [] [1,"two"] {"k":"v"}"#
        );
    }

    #[test]
    fn test_whole_context() {
        assert_eq!(render("{{.}}", json!("scalar")), "scalar");
    }

    #[test]
    fn test_function_call_and_pipeline() {
        let context = json!({"name": "db-primary", "empty": ""});
        assert_eq!(render("{{ upper .name }}", context.clone()), "DB-PRIMARY");
        assert_eq!(render(r#"{{ .empty | default "n/a" | upper }}"#, context), "N/A");
    }

    #[test]
    fn test_literals() {
        assert_eq!(render(r#"{{ "a\"b" }}"#, json!({})), "a\"b");
        assert_eq!(render("{{ `raw \\n` }}", json!({})), "raw \\n");
        assert_eq!(render("{{ -3 }} {{ 1.5 }} {{ true }} [{{ nil }}]", json!({})), "-3 1.5 true []");
    }

    #[test]
    fn test_closing_delimiter_inside_string() {
        assert_eq!(render(r#"{{ "}}" }}"#, json!({})), "}}");
    }

    #[test]
    fn test_trim_markers() {
        let context = json!({"a": "x"});
        assert_eq!(render("a  {{- .a -}}  b", context.clone()), "axb");
        assert_eq!(render("a  {{- .a }}  b", context), "ax  b");
    }

    #[test]
    fn test_comment_is_dropped() {
        assert_eq!(render("a{{/* note */}}b", json!({})), "ab");
    }

    #[test]
    fn test_custom_function() {
        let funcs = FuncMap::new().with("shout", |args: &[Value]| {
            Ok(Value::String(format!("{}!", to_text(&args[0]))))
        });
        let template = Template::compile("custom", "{{ shout .word }}", &funcs).unwrap();
        assert_eq!(template.render(&json!({"word": "hey"})).unwrap(), "hey!");
    }

    #[test]
    fn test_custom_function_shadows_builtin() {
        let funcs = FuncMap::new().with("upper", |_args: &[Value]| Ok(json!("shadowed")));
        let template = Template::compile("custom", "{{ upper .x }}", &funcs).unwrap();
        assert_eq!(template.render(&json!({"x": "a"})).unwrap(), "shadowed");
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(syntax_error("{{.foo"), "unclosed action");
        assert_eq!(syntax_error("{{ }}"), "missing value for command");
        assert_eq!(syntax_error(r#"{{ "abc }}"#), "unterminated quoted string");
        assert_eq!(syntax_error("{{ nope .x }}"), "function \"nope\" not defined");
        assert_eq!(syntax_error("{{ .a .b }}"), "can't give argument to non-function");
        assert_eq!(syntax_error("{{ .a | .b }}"), "non executable command in pipeline stage 2");
        assert_eq!(syntax_error("{{ .a | }}"), "missing command in pipeline");
        assert!(syntax_error("{{ # }}").starts_with("unexpected"));
    }

    #[test]
    fn test_render_error_from_function() {
        let funcs = FuncMap::new().with("fail", |_args: &[Value]| Err("boom".to_string()));
        let template = Template::compile("failing", "x{{ fail }}", &funcs).unwrap();
        let err = template.render(&json!({})).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Render {
                template: "failing".to_string(),
                message: "error calling fail: boom".to_string(),
            }
        );
    }

    #[test]
    fn test_compiled_template_is_reusable() {
        let template = Template::compile("reuse", "{{.n}}", &FuncMap::new()).unwrap();
        assert_eq!(template.name(), "reuse");
        assert_eq!(template.render(&json!({"n": 1})).unwrap(), "1");
        assert_eq!(template.render(&json!({"n": 2})).unwrap(), "2");
    }

    #[test]
    fn test_comment_with_quote() {
        assert_eq!(render(r#"a{{/* don't "quote */}}b"#, json!({})), "ab");
        assert_eq!(render("a  {{- /* x */ -}}  b", json!({})), "ab");
    }

    #[test]
    fn test_if_else() {
        let template = r#"{{if eq .status "Healthy"}}good{{else}}danger{{end}}"#;
        assert_eq!(render(template, json!({"status": "Healthy"})), "good");
        assert_eq!(render(template, json!({"status": "Degraded"})), "danger");
        assert_eq!(render("[{{if .missing}}x{{end}}]", json!({})), "[]");
    }

    #[test]
    fn test_else_if_chain() {
        let template = r#"{{if eq .n 1}}one{{else if eq .n 2}}two{{else}}many{{end}}"#;
        assert_eq!(render(template, json!({"n": 1})), "one");
        assert_eq!(render(template, json!({"n": 2})), "two");
        assert_eq!(render(template, json!({"n": 7})), "many");
    }

    #[test]
    fn test_emptiness() {
        let template = "{{if .v}}y{{else}}n{{end}}";
        for empty in [json!(false), json!(0), json!(""), json!([]), json!({}), json!(null)] {
            assert_eq!(render(template, json!({"v": empty})), "n");
        }
        for full in [json!(true), json!(0.5), json!("x"), json!([0]), json!({"k": null})] {
            assert_eq!(render(template, json!({"v": full})), "y");
        }
    }

    #[test]
    fn test_with_rebinds_dot() {
        let context = json!({"app": {"name": "guestbook"}});
        assert_eq!(render("{{with .app}}{{.name}}{{end}}", context.clone()), "guestbook");
        assert_eq!(render("{{with .nope}}x{{else}}none{{end}}", context), "none");
    }

    #[test]
    fn test_range() {
        let context = json!({"items": ["a", "b", "c"], "none": []});
        assert_eq!(render("{{range .items}}<{{.}}>{{end}}", context.clone()), "<a><b><c>");
        assert_eq!(
            render("{{range $i, $e := .items}}{{$i}}={{$e}} {{end}}", context.clone()),
            "0=a 1=b 2=c "
        );
        assert_eq!(render("{{range .none}}x{{else}}empty{{end}}", context), "empty");
    }

    #[test]
    fn test_range_over_object_in_key_order() {
        let context = json!({"labels": {"b": "2", "a": "1"}});
        assert_eq!(
            render("{{range $k, $v := .labels}}{{$k}}:{{$v}};{{end}}", context),
            "a:1;b:2;"
        );
    }

    #[test]
    fn test_range_separators() {
        let context = json!({"conditions": [{"type": "A"}, {"type": "B"}]});
        let template = "{{range $i, $c := .conditions}}{{if $i}}, {{end}}{{$c.type}}{{end}}";
        assert_eq!(render(template, context), "A, B");
    }

    #[test]
    fn test_range_trimmed_lines() {
        let template = "Items:\n{{- range .items }}\n- {{ . }}\n{{- end }}";
        assert_eq!(render(template, json!({"items": [1, 2]})), "Items:\n- 1\n- 2");
    }

    #[test]
    fn test_root_variable_inside_blocks() {
        let context = json!({"env": "prod", "items": ["a"]});
        assert_eq!(render("{{range .items}}{{.}}@{{$.env}}{{end}}", context), "a@prod");
    }

    #[test]
    fn test_variable_declaration() {
        let context = json!({"app": {"name": "guestbook"}});
        assert_eq!(render("{{ $n := .app.name }}[{{ upper $n }}]", context.clone()), "[GUESTBOOK]");
        assert_eq!(render("{{with $a := .app}}{{$a.name}}{{end}}", context), "guestbook");
    }

    #[test]
    fn test_parenthesized_arguments() {
        let context = json!({"a": "x", "b": ""});
        assert_eq!(render("{{ if and .a (not .b) }}ok{{ end }}", context.clone()), "ok");
        assert_eq!(render(r#"{{ printf "%s-%s" (upper .a) "y" }}"#, context), "X-y");
    }

    #[test]
    fn test_printf() {
        let context = json!({"name": "db", "pct": 97.456});
        assert_eq!(render(r#"{{ printf "%s at %.1f%%" .name .pct }}"#, context), "db at 97.5%");
    }

    #[test]
    fn test_range_over_scalar_fails() {
        let template = Template::compile("scalar", "{{range .n}}{{end}}", &FuncMap::new()).unwrap();
        let err = template.render(&json!({"n": 3})).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Render {
                template: "scalar".to_string(),
                message: "range can't iterate over 3".to_string(),
            }
        );
    }
}
