//! Built-in template functions

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

use once_cell::sync::Lazy;
use serde_json::Value;

use super::engine::to_text;
use super::types::FuncMap;

/// Functions available to every template
pub(crate) static BUILTINS: Lazy<FuncMap> = Lazy::new(builtin_funcs);

fn builtin_funcs() -> FuncMap {
    FuncMap::new()
        .with("upper", |args: &[Value]| {
            arity("upper", args, 1)?;
            Ok(Value::String(to_text(&args[0]).to_uppercase()))
        })
        .with("lower", |args: &[Value]| {
            arity("lower", args, 1)?;
            Ok(Value::String(to_text(&args[0]).to_lowercase()))
        })
        .with("trim", |args: &[Value]| {
            arity("trim", args, 1)?;
            Ok(Value::String(to_text(&args[0]).trim().to_string()))
        })
        .with("title", |args: &[Value]| {
            arity("title", args, 1)?;
            Ok(Value::String(title_case(&to_text(&args[0]))))
        })
        .with("default", |args: &[Value]| {
            arity("default", args, 2)?;
            if is_empty(&args[1]) {
                Ok(args[0].clone())
            } else {
                Ok(args[1].clone())
            }
        })
        .with("quote", |args: &[Value]| {
            arity("quote", args, 1)?;
            Ok(Value::String(Value::String(to_text(&args[0])).to_string()))
        })
        .with("toJson", |args: &[Value]| {
            arity("toJson", args, 1)?;
            serde_json::to_string(&args[0])
                .map(Value::String)
                .map_err(|e| e.to_string())
        })
        .with("join", |args: &[Value]| {
            arity("join", args, 2)?;
            match &args[1] {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(to_text).collect::<Vec<_>>().join(&to_text(&args[0])),
                )),
                Value::Null => Ok(Value::String(String::new())),
                other => Err(format!("cannot join {}", kind(other))),
            }
        })
        .with("replace", |args: &[Value]| {
            arity("replace", args, 3)?;
            Ok(Value::String(
                to_text(&args[2]).replace(&to_text(&args[0]), &to_text(&args[1])),
            ))
        })
        .with("index", |args: &[Value]| {
            if args.len() < 2 {
                return Err(format!("index: expected at least 2 arguments, got {}", args.len()));
            }
            let mut current = &args[0];
            for key in &args[1..] {
                let next = match (current, key) {
                    (Value::Object(map), key) => map.get(&to_text(key)),
                    (Value::Array(items), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| items.get(i as usize)),
                    (Value::Null, _) => None,
                    (other, _) => return Err(format!("can't index item of type {}", kind(other))),
                };
                match next {
                    Some(value) => current = value,
                    None => return Ok(Value::Null),
                }
            }
            Ok(current.clone())
        })
        .with("len", |args: &[Value]| {
            arity("len", args, 1)?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::Null => 0,
                other => return Err(format!("len of type {}", kind(other))),
            };
            Ok(Value::from(len))
        })
        .with("not", |args: &[Value]| {
            arity("not", args, 1)?;
            Ok(Value::Bool(is_empty(&args[0])))
        })
        // `and` / `or` yield an argument, not a bool
        .with("and", |args: &[Value]| {
            let last = args.last().ok_or("and: wrong number of args: want at least 1 got 0")?;
            Ok(args.iter().find(|arg| is_empty(arg)).unwrap_or(last).clone())
        })
        .with("or", |args: &[Value]| {
            let last = args.last().ok_or("or: wrong number of args: want at least 1 got 0")?;
            Ok(args.iter().find(|arg| !is_empty(arg)).unwrap_or(last).clone())
        })
        .with("eq", |args: &[Value]| {
            let Some((first, rest)) = args.split_first().filter(|(_, rest)| !rest.is_empty()) else {
                return Err("eq: missing argument for comparison".to_string());
            };
            for other in rest {
                if equal(first, other)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        })
        .with("ne", |args: &[Value]| {
            arity("ne", args, 2)?;
            Ok(Value::Bool(!equal(&args[0], &args[1])?))
        })
        .with("lt", |args: &[Value]| ordered("lt", args, Ordering::is_lt))
        .with("le", |args: &[Value]| ordered("le", args, Ordering::is_le))
        .with("gt", |args: &[Value]| ordered("gt", args, Ordering::is_gt))
        .with("ge", |args: &[Value]| ordered("ge", args, Ordering::is_ge))
        .with("printf", |args: &[Value]| {
            let (format, rest) = args
                .split_first()
                .ok_or("printf: wrong number of args: want at least 1 got 0")?;
            Ok(Value::String(sprintf(&to_text(format), rest)))
        })
        .with("print", |args: &[Value]| {
            let mut out = String::new();
            for (i, arg) in args.iter().enumerate() {
                // Operands are space separated unless either side is a string
                if i > 0 && !arg.is_string() && !args[i - 1].is_string() {
                    out.push(' ');
                }
                out.push_str(&to_text(arg));
            }
            Ok(Value::String(out))
        })
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "{name}: wrong number of args: want {expected} got {}",
            args.len()
        ));
    }
    Ok(())
}

/// Whether `value` selects the body of `if` / `with` / `range`
pub(crate) fn truthy(value: &Value) -> bool {
    !is_empty(value)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn equal(a: &Value, b: &Value) -> Result<bool, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        }),
        (Value::Null, _) | (_, Value::Null) => Ok(a == b),
        _ if kind(a) == kind(b) => Ok(a == b),
        _ => Err(format!(
            "incompatible types for comparison: {} and {}",
            kind(a),
            kind(b)
        )),
    }
}

fn ordered(name: &str, args: &[Value], accept: fn(Ordering) -> bool) -> Result<Value, String> {
    arity(name, args, 2)?;
    let ordering = match (&args[0], &args[1]) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x
                .as_f64()
                .zip(y.as_f64())
                .and_then(|(x, y)| x.partial_cmp(&y)),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    };
    ordering.map(|o| Value::Bool(accept(o))).ok_or_else(|| {
        format!(
            "incompatible types for comparison: {} and {}",
            kind(&args[0]),
            kind(&args[1])
        )
    })
}

#[derive(Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// Printf-style formatting over the verbs `%s %v %q %d %f %t %x %%`.
///
/// Mismatches are rendered inline (`%!d(string=x)`, `%!s(MISSING)`) rather
/// than failing the render.
fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        spec.width = read_number(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(read_number(&mut chars).unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };
        let text = format_verb(verb, &spec, arg)
            .unwrap_or_else(|| format!("%!{verb}({}={})", kind(arg), to_text(arg)));
        out.push_str(&pad(text, &spec));
    }

    let extra: Vec<String> = args
        .map(|arg| format!("{}={}", kind(arg), to_text(arg)))
        .collect();
    if !extra.is_empty() {
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }
    out
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits.parse().ok()
}

fn format_verb(verb: char, spec: &Spec, arg: &Value) -> Option<String> {
    match verb {
        's' | 'v' => {
            let text = to_text(arg);
            Some(match spec.precision {
                Some(p) if verb == 's' => text.chars().take(p).collect(),
                _ => text,
            })
        }
        'q' => Some(Value::String(to_text(arg)).to_string()),
        'd' => {
            let n = arg.as_i64()?;
            Some(if spec.plus && n >= 0 { format!("+{n}") } else { n.to_string() })
        }
        'f' | 'F' => {
            let f = arg.as_f64()?;
            let p = spec.precision.unwrap_or(6);
            Some(if spec.plus && f >= 0.0 {
                format!("+{f:.p$}")
            } else {
                format!("{f:.p$}")
            })
        }
        't' => arg.as_bool().map(|b| b.to_string()),
        'x' => match arg {
            Value::Number(n) => n.as_i64().map(|n| {
                if n < 0 {
                    format!("-{:x}", n.unsigned_abs())
                } else {
                    format!("{n:x}")
                }
            }),
            Value::String(s) => Some(s.bytes().map(|b| format!("{b:02x}")).collect()),
            _ => None,
        },
        _ => None,
    }
}

fn pad(text: String, spec: &Spec) -> String {
    let len = text.chars().count();
    let fill = match spec.width {
        Some(width) if width > len => width - len,
        _ => return text,
    };

    if spec.left {
        format!("{text}{}", " ".repeat(fill))
    } else if spec.zero {
        match text.strip_prefix('-') {
            Some(digits) => format!("-{}{digits}", "0".repeat(fill)),
            None => format!("{}{text}", "0".repeat(fill)),
        }
    } else {
        format!("{}{text}", " ".repeat(fill))
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Result<Value, String> {
        BUILTINS.get(name).expect("builtin exists")(args)
    }

    #[test]
    fn test_case_functions() {
        assert_eq!(call("upper", &[json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(call("lower", &[json!("ABC")]).unwrap(), json!("abc"));
        assert_eq!(call("trim", &[json!("  x ")]).unwrap(), json!("x"));
        assert_eq!(call("title", &[json!("out of sync")]).unwrap(), json!("Out Of Sync"));
    }

    #[test]
    fn test_default() {
        assert_eq!(call("default", &[json!("d"), json!("")]).unwrap(), json!("d"));
        assert_eq!(call("default", &[json!("d"), Value::Null]).unwrap(), json!("d"));
        assert_eq!(call("default", &[json!("d"), json!("v")]).unwrap(), json!("v"));
        assert_eq!(call("default", &[json!("d"), json!(0)]).unwrap(), json!("d"));
    }

    #[test]
    fn test_quote_and_to_json() {
        assert_eq!(call("quote", &[json!("say \"hi\"")]).unwrap(), json!(r#""say \"hi\"""#));
        assert_eq!(call("toJson", &[json!({"a": [1, 2]})]).unwrap(), json!(r#"{"a":[1,2]}"#));
    }

    #[test]
    fn test_join_and_replace() {
        assert_eq!(call("join", &[json!(", "), json!(["a", 1])]).unwrap(), json!("a, 1"));
        assert!(call("join", &[json!(","), json!("scalar")]).is_err());
        assert_eq!(
            call("replace", &[json!("-"), json!("_"), json!("a-b-c")]).unwrap(),
            json!("a_b_c")
        );
    }

    #[test]
    fn test_index() {
        let data = json!({"labels": {"env": "prod"}, "items": ["x", "y"]});
        assert_eq!(call("index", &[data.clone(), json!("labels"), json!("env")]).unwrap(), json!("prod"));
        assert_eq!(call("index", &[data.clone(), json!("items"), json!(1)]).unwrap(), json!("y"));
        assert_eq!(call("index", &[data.clone(), json!("missing")]).unwrap(), Value::Null);
        assert!(call("index", &[json!("s"), json!(0)]).is_err());
    }

    #[test]
    fn test_len() {
        assert_eq!(call("len", &[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(call("len", &[json!([1, 2, 3])]).unwrap(), json!(3));
        assert!(call("len", &[json!(true)]).is_err());
    }

    #[test]
    fn test_logic() {
        assert_eq!(call("not", &[json!("")]).unwrap(), json!(true));
        assert_eq!(call("not", &[json!([1])]).unwrap(), json!(false));
        assert_eq!(call("and", &[json!("a"), json!(0), json!("c")]).unwrap(), json!(0));
        assert_eq!(call("and", &[json!("a"), json!("c")]).unwrap(), json!("c"));
        assert_eq!(call("or", &[json!(""), json!("b"), json!("c")]).unwrap(), json!("b"));
        assert_eq!(call("or", &[json!(""), json!(null)]).unwrap(), Value::Null);
        assert!(call("and", &[]).is_err());
    }

    #[test]
    fn test_equality() {
        assert_eq!(call("eq", &[json!("Healthy"), json!("Healthy")]).unwrap(), json!(true));
        assert_eq!(call("eq", &[json!(2), json!(1), json!(2.0)]).unwrap(), json!(true));
        assert_eq!(call("eq", &[json!(null), json!("x")]).unwrap(), json!(false));
        assert_eq!(call("ne", &[json!("a"), json!("b")]).unwrap(), json!(true));
        assert_eq!(
            call("eq", &[json!("1"), json!(1)]).unwrap_err(),
            "incompatible types for comparison: string and number"
        );
        assert_eq!(call("eq", &[json!(1)]).unwrap_err(), "eq: missing argument for comparison");
    }

    #[test]
    fn test_ordering() {
        assert_eq!(call("lt", &[json!(1), json!(2)]).unwrap(), json!(true));
        assert_eq!(call("le", &[json!(2), json!(2.0)]).unwrap(), json!(true));
        assert_eq!(call("gt", &[json!("b"), json!("a")]).unwrap(), json!(true));
        assert_eq!(call("ge", &[json!(1.5), json!(2)]).unwrap(), json!(false));
        assert!(call("lt", &[json!(true), json!(false)]).is_err());
    }

    #[test]
    fn test_printf() {
        let printf = |args: &[Value]| call("printf", args).unwrap();
        assert_eq!(printf(&[json!("%s=%v"), json!("k"), json!([1])]), json!("k=[1]"));
        assert_eq!(printf(&[json!("%d items"), json!(3)]), json!("3 items"));
        assert_eq!(printf(&[json!("%.2f"), json!(1.005)]), json!("1.00"));
        assert_eq!(printf(&[json!("%5s|%-4d|%03d"), json!("ab"), json!(7), json!(-5)]), json!("   ab|7   |-05"));
        assert_eq!(printf(&[json!("%q %t %x"), json!("a"), json!(true), json!(255)]), json!(r#""a" true ff"#));
        assert_eq!(printf(&[json!("100%%")]), json!("100%"));
    }

    #[test]
    fn test_printf_mismatches() {
        let printf = |args: &[Value]| call("printf", args).unwrap();
        assert_eq!(printf(&[json!("%s and %s"), json!("a")]), json!("a and %!s(MISSING)"));
        assert_eq!(printf(&[json!("%d"), json!("x")]), json!("%!d(string=x)"));
        assert_eq!(printf(&[json!("x"), json!(1)]), json!("x%!(EXTRA number=1)"));
    }

    #[test]
    fn test_print() {
        assert_eq!(call("print", &[json!(1), json!(2)]).unwrap(), json!("1 2"));
        assert_eq!(call("print", &[json!("a"), json!(1), json!("b")]).unwrap(), json!("a1b"));
    }

    #[test]
    fn test_arity_is_checked() {
        let err = call("upper", &[]).unwrap_err();
        assert_eq!(err, "upper: wrong number of args: want 1 got 0");
    }
}
