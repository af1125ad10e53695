use agentflow_core::config::Predicate;
use agentflow_core::types::value_to_text;
use serde_json::Value;

/// Evaluate a node-activation predicate against a producer's output.
///
/// Never panics; malformed expressions and bad patterns evaluate to `false`.
pub fn evaluate(predicate: &Predicate, output: &Value) -> bool {
    match predicate {
        Predicate::Equals { value } => output == value,
        Predicate::NotEquals { value } => output != value,
        Predicate::Contains { substring } => value_to_text(output).contains(substring.as_str()),
        Predicate::Matches { pattern } => regex::Regex::new(pattern)
            .map(|re| re.is_match(&value_to_text(output)))
            .unwrap_or(false),
        Predicate::FieldEquals { path, value } => lookup(output, path) == Some(value),
        Predicate::Truthy => truthy(output),
        Predicate::Expr { expr } => evaluate_expr(expr, output),
        Predicate::Not { predicate } => !evaluate(predicate, output),
        Predicate::All { predicates } => predicates.iter().all(|p| evaluate(p, output)),
        Predicate::Any { predicates } => predicates.iter().any(|p| evaluate(p, output)),
    }
}

/// Check a predicate for problems that can be caught before running.
pub fn validate(predicate: &Predicate) -> Result<(), String> {
    match predicate {
        Predicate::Matches { pattern } => regex::Regex::new(pattern)
            .map(|_| ())
            .map_err(|e| format!("invalid pattern '{}': {}", pattern, e)),
        Predicate::Expr { expr } => {
            if parse_expr(expr).is_some() {
                Ok(())
            } else {
                Err(format!("unparseable expression '{}'", expr))
            }
        }
        Predicate::FieldEquals { path, .. } if path.trim().is_empty() => {
            Err("field path is empty".into())
        }
        Predicate::Not { predicate } => validate(predicate),
        Predicate::All { predicates } | Predicate::Any { predicates } => {
            predicates.iter().try_for_each(validate)
        }
        _ => Ok(()),
    }
}

/// Dot-path lookup. Numeric segments index into arrays.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, PartialEq)]
enum Op {
    Eq,
    Ne,
    Contains,
}

/// Parse `key OP "value"`. `contains` is tried first so values holding `==`
/// still parse.
fn parse_expr(expr: &str) -> Option<(&str, Op, &str)> {
    let expr = expr.trim();
    for (token, op) in [(" contains ", Op::Contains), ("!=", Op::Ne), ("==", Op::Eq)] {
        if let Some((key, value)) = expr.split_once(token) {
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            return Some((key, op, value.trim().trim_matches('"')));
        }
    }
    None
}

/// `output` names the whole value; anything else is a dot path into it.
fn evaluate_expr(expr: &str, output: &Value) -> bool {
    let Some((key, op, expected)) = parse_expr(expr) else {
        return false;
    };
    let subject = if key == "output" {
        Some(output)
    } else {
        lookup(output, key)
    };
    let Some(subject) = subject else {
        return false;
    };
    let text = value_to_text(subject);
    match op {
        Op::Eq => text == expected,
        Op::Ne => text != expected,
        Op::Contains => text.contains(expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equals_and_not_equals() {
        let p = Predicate::Equals { value: json!("yes") };
        assert!(evaluate(&p, &json!("yes")));
        assert!(!evaluate(&p, &json!("no")));

        let p = Predicate::NotEquals { value: json!(1) };
        assert!(evaluate(&p, &json!(2)));
    }

    #[test]
    fn contains_renders_non_strings() {
        let p = Predicate::Contains {
            substring: "AI".into(),
        };
        assert!(evaluate(&p, &json!("Interested in AI and music")));
        assert!(evaluate(&p, &json!({"interests": ["AI"]})));
        assert!(!evaluate(&p, &json!("gardening")));
    }

    #[test]
    fn regex_match() {
        let p = Predicate::Matches {
            pattern: r"^score: \d+$".into(),
        };
        assert!(evaluate(&p, &json!("score: 42")));
        assert!(!evaluate(&p, &json!("score: high")));

        let bad = Predicate::Matches {
            pattern: "(".into(),
        };
        assert!(!evaluate(&bad, &json!("(")));
        assert!(validate(&bad).is_err());
    }

    #[test]
    fn field_equals_with_array_index() {
        let output = json!({"items": [{"kind": "book"}, {"kind": "film"}]});
        let p = Predicate::FieldEquals {
            path: "items.1.kind".into(),
            value: json!("film"),
        };
        assert!(evaluate(&p, &output));
        let missing = Predicate::FieldEquals {
            path: "items.9.kind".into(),
            value: json!("film"),
        };
        assert!(!evaluate(&missing, &output));
    }

    #[test]
    fn truthiness() {
        for v in [json!(null), json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(!evaluate(&Predicate::Truthy, &v), "{} should be falsy", v);
        }
        for v in [json!(true), json!(1.5), json!("x"), json!([0]), json!({"a": 1})] {
            assert!(evaluate(&Predicate::Truthy, &v), "{} should be truthy", v);
        }
    }

    #[test]
    fn expressions() {
        let output = json!({"status": "approved", "note": "a == b"});
        let eval = |e: &str| {
            evaluate(
                &Predicate::Expr {
                    expr: e.to_string(),
                },
                &output,
            )
        };
        assert!(eval(r#"status == "approved""#));
        assert!(eval(r#"status != "rejected""#));
        assert!(eval(r#"note contains "==""#));
        assert!(eval(r#"output contains "approved""#));
        assert!(!eval(r#"missing == "x""#));
        assert!(!eval("gibberish"));
    }

    #[test]
    fn combinators() {
        let p = Predicate::All {
            predicates: vec![
                Predicate::Truthy,
                Predicate::Not {
                    predicate: Box::new(Predicate::Contains {
                        substring: "error".into(),
                    }),
                },
            ],
        };
        assert!(evaluate(&p, &json!("all good")));
        assert!(!evaluate(&p, &json!("error: boom")));

        let p = Predicate::Any {
            predicates: vec![
                Predicate::Equals { value: json!("a") },
                Predicate::Equals { value: json!("b") },
            ],
        };
        assert!(evaluate(&p, &json!("b")));
        assert!(!evaluate(&p, &json!("c")));
    }

    #[test]
    fn validate_nested() {
        let p = Predicate::Any {
            predicates: vec![
                Predicate::Truthy,
                Predicate::Expr {
                    expr: "no operator here".into(),
                },
            ],
        };
        assert!(validate(&p).is_err());
        assert!(validate(&Predicate::Truthy).is_ok());
    }
}
