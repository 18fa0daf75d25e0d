use super::parser::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::{ExprError, Scope, MAX_STEPS};
use leycore::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub(crate) struct Evaluator<'a> {
    scope: &'a Scope,
    steps: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: &'a Scope) -> Self {
        Self { scope, steps: 0 }
    }

    /// Spend `cost` steps of the budget.
    fn charge(&mut self, cost: usize) -> Result<(), ExprError> {
        self.steps = self.steps.saturating_add(cost);
        if self.steps > MAX_STEPS {
            return Err(ExprError::BudgetExceeded(MAX_STEPS));
        }
        Ok(())
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        self.charge(1)?;

        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self
                .scope
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
            Expr::Array(items) => Ok(Value::Array(
                items.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Object(fields) => {
                let mut map = BTreeMap::new();
                for (key, value) in fields {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Member(target, name) => {
                let target = self.eval(target)?;
                member(&target, name)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                lookup(&target, &index)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                // builtins walk their arguments, so large collections cost more
                self.charge(args.iter().map(weight).sum())?;
                call(name, args)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => Ok(Value::Number(-to_number(&value)?)),
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left)?;
                let take_left = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_null(),
                };
                if take_left {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional(condition, then, otherwise) => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }
}

fn weight(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) => s.len(),
        _ => 0,
    }
}

fn member(target: &Value, name: &str) -> Result<Value, ExprError> {
    match (target, name) {
        (Value::Null, _) => Err(ExprError::Type(format!(
            "cannot read property '{}' of null",
            name
        ))),
        (Value::Array(items), "length") => Ok(Value::from(items.len())),
        (Value::String(s), "length") => Ok(Value::from(s.chars().count())),
        (Value::Object(map), _) => Ok(map.get(name).cloned().unwrap_or_default()),
        _ => Ok(Value::Null),
    }
}

fn lookup(target: &Value, index: &Value) -> Result<Value, ExprError> {
    match (target, index) {
        (Value::Null, _) => Err(ExprError::Type(format!(
            "cannot read index {} of null",
            index
        ))),
        (Value::Array(items), Value::Number(n)) => Ok(position(*n)
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or_default()),
        (Value::String(s), Value::Number(n)) => Ok(position(*n)
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or_default()),
        (_, Value::String(name)) => member(target, name),
        _ => Ok(Value::Null),
    }
}

fn position(n: f64) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0).then_some(n as usize)
}

/// Numeric view of a value: booleans count as 0/1, null as 0, numeric
/// strings are parsed.
fn to_number(value: &Value) -> Result<f64, ExprError> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ExprError::Type(format!("'{}' is not a number", s))),
        other => Err(ExprError::Type(format!(
            "cannot use {} as a number",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    let arithmetic = |f: fn(f64, f64) -> f64| -> Result<Value, ExprError> {
        Ok(Value::Number(f(to_number(left)?, to_number(right)?)))
    };

    match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", left, right)))
            }
            _ => arithmetic(|a, b| a + b),
        },
        BinaryOp::Sub => arithmetic(|a, b| a - b),
        BinaryOp::Mul => arithmetic(|a, b| a * b),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = to_number(right)?;
            if divisor == 0.0 {
                return Err(ExprError::Type("division by zero".to_string()));
            }
            let dividend = to_number(left)?;
            Ok(Value::Number(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            }))
        }
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::NotEq => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
    }
}

/// Ordering for comparisons and sorting. Mixed scalar types fall back to a
/// numeric comparison.
pub(crate) fn compare(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    if let Some(ordering) = left.partial_cmp_loose(right) {
        return Ok(ordering);
    }
    let (a, b) = (to_number(left)?, to_number(right)?);
    a.partial_cmp(&b).ok_or_else(|| {
        ExprError::Type(format!(
            "cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))
    })
}

fn arity(name: &str, args: &[Value], expected: &'static str, ok: bool) -> Result<(), ExprError> {
    if ok {
        Ok(())
    } else {
        Err(ExprError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        })
    }
}

fn string_arg<'v>(name: &str, value: &'v Value) -> Result<&'v str, ExprError> {
    value
        .as_str()
        .ok_or_else(|| ExprError::Type(format!("{}() expects a string, got {}", name, value.type_name())))
}

fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, ExprError> {
    // a single array argument is spread
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| ExprError::Type(format!("{}() expects numbers, got {}", name, v.type_name())))
        })
        .collect()
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    let one = |args: &[Value]| arity(name, args, "1", args.len() == 1);
    let two = |args: &[Value]| arity(name, args, "2", args.len() == 2);

    match name {
        "len" => {
            one(&args)?;
            match &args[0] {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => Err(ExprError::Type(format!("len() of {}", other.type_name()))),
            }
        }
        "upper" | "lower" | "trim" => {
            one(&args)?;
            let s = string_arg(name, &args[0])?;
            Ok(Value::String(match name {
                "upper" => s.to_uppercase(),
                "lower" => s.to_lowercase(),
                _ => s.trim().to_string(),
            }))
        }
        "contains" => {
            two(&args)?;
            match (&args[0], &args[1]) {
                (Value::String(hay), Value::String(needle)) => Ok(Value::Bool(hay.contains(needle.as_str()))),
                (Value::Array(items), needle) => Ok(Value::Bool(items.contains(needle))),
                (Value::Object(map), Value::String(key)) => Ok(Value::Bool(map.contains_key(key))),
                (hay, _) => Err(ExprError::Type(format!("contains() on {}", hay.type_name()))),
            }
        }
        "startsWith" | "endsWith" => {
            two(&args)?;
            let s = string_arg(name, &args[0])?;
            let affix = string_arg(name, &args[1])?;
            Ok(Value::Bool(if name == "startsWith" {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            }))
        }
        "split" => {
            two(&args)?;
            let s = string_arg(name, &args[0])?;
            let sep = string_arg(name, &args[1])?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(sep).map(Value::from).collect()
            };
            Ok(Value::Array(parts))
        }
        "join" => {
            arity(name, &args, "1 or 2", matches!(args.len(), 1 | 2))?;
            let items = args[0]
                .as_array()
                .ok_or_else(|| ExprError::Type("join() expects an array".to_string()))?;
            let sep = match args.get(1) {
                Some(sep) => string_arg(name, sep)?,
                None => ",",
            };
            let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
            Ok(Value::String(parts.join(sep)))
        }
        "keys" | "values" => {
            one(&args)?;
            let map = args[0]
                .as_object()
                .ok_or_else(|| ExprError::Type(format!("{}() expects an object", name)))?;
            Ok(Value::Array(if name == "keys" {
                map.keys().map(|k| Value::from(k.as_str())).collect()
            } else {
                map.values().cloned().collect()
            }))
        }
        "abs" | "round" | "floor" | "ceil" => {
            one(&args)?;
            let n = to_number(&args[0])?;
            Ok(Value::Number(match name {
                "abs" => n.abs(),
                "round" => n.round(),
                "floor" => n.floor(),
                _ => n.ceil(),
            }))
        }
        "min" | "max" => {
            let values = numbers(name, &args)?;
            let folded = values.into_iter().reduce(if name == "min" { f64::min } else { f64::max });
            Ok(folded.map(Value::Number).unwrap_or_default())
        }
        "sum" => Ok(Value::Number(numbers(name, &args)?.into_iter().sum())),
        "str" => {
            one(&args)?;
            Ok(Value::String(args[0].to_string()))
        }
        "num" => {
            one(&args)?;
            Ok(Value::Number(to_number(&args[0])?))
        }
        "bool" => {
            one(&args)?;
            Ok(Value::Bool(args[0].is_truthy()))
        }
        "type" => {
            one(&args)?;
            Ok(Value::from(args[0].type_name()))
        }
        "concat" => {
            if args.iter().all(|a| matches!(a, Value::String(_))) {
                return Ok(Value::String(args.iter().map(|a| a.to_string()).collect()));
            }
            let mut out = Vec::new();
            for arg in args {
                match arg {
                    Value::Array(items) => out.extend(items),
                    other => out.push(other),
                }
            }
            Ok(Value::Array(out))
        }
        "get" => {
            arity(name, &args, "2 or 3", matches!(args.len(), 2 | 3))?;
            let path = string_arg(name, &args[1])?;
            Ok(args[0]
                .pointer(path)
                .cloned()
                .or_else(|| args.get(2).cloned())
                .unwrap_or_default())
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Expression, Scope};
    use super::*;

    fn eval(source: &str, scope: &Scope) -> Result<Value, ExprError> {
        Expression::parse(source)?.eval(scope)
    }

    fn json(text: &str) -> Value {
        serde_json::from_str::<serde_json::Value>(text).unwrap().into()
    }

    fn item_scope() -> Scope {
        Scope::new().with("item", json(r#"{"name": "Ada", "age": 36, "tags": ["x", "y"], "boss": null}"#))
    }

    #[test]
    fn arithmetic_and_precedence() {
        let scope = Scope::new();
        assert_eq!(eval("1 + 2 * 3", &scope).unwrap(), Value::from(7i64));
        assert_eq!(eval("(1 + 2) * 3", &scope).unwrap(), Value::from(9i64));
        assert_eq!(eval("7 % 4 - -1", &scope).unwrap(), Value::from(4i64));
        assert_eq!(eval("null + 1", &scope).unwrap(), Value::from(1i64));
    }

    #[test]
    fn string_concatenation() {
        let scope = item_scope();
        assert_eq!(eval("'hi ' + item.name", &scope).unwrap(), Value::from("hi Ada"));
        assert_eq!(eval("item.name + 1", &scope).unwrap(), Value::from("Ada1"));
    }

    #[test]
    fn member_access() {
        let scope = item_scope();
        assert_eq!(eval("item.age", &scope).unwrap(), Value::from(36i64));
        assert_eq!(eval("item.tags[1]", &scope).unwrap(), Value::from("y"));
        assert_eq!(eval("item['name']", &scope).unwrap(), Value::from("Ada"));
        assert_eq!(eval("item.tags.length", &scope).unwrap(), Value::from(2i64));
        assert_eq!(eval("item.missing", &scope).unwrap(), Value::Null);
        assert!(matches!(eval("item.boss.name", &scope), Err(ExprError::Type(_))));
    }

    #[test]
    fn logical_operators_yield_operands() {
        let scope = item_scope();
        assert_eq!(eval("item.boss || 'none'", &scope).unwrap(), Value::from("none"));
        assert_eq!(eval("item.boss ?? 0", &scope).unwrap(), Value::from(0i64));
        assert_eq!(eval("0 ?? 5", &scope).unwrap(), Value::from(0i64));
        assert_eq!(eval("item.age > 30 && item.name", &scope).unwrap(), Value::from("Ada"));
        assert_eq!(eval("!item.boss", &scope).unwrap(), Value::Bool(true));
    }

    #[test]
    fn short_circuit_skips_errors() {
        let scope = Scope::new();
        assert_eq!(eval("false && missing", &scope).unwrap(), Value::Bool(false));
        assert!(matches!(eval("true && missing", &scope), Err(ExprError::UnknownIdentifier(_))));
    }

    #[test]
    fn comparisons_and_ternary() {
        let scope = item_scope();
        assert_eq!(eval("item.age >= 36 ? 'senior' : 'junior'", &scope).unwrap(), Value::from("senior"));
        assert_eq!(eval("'a' < 'b'", &scope).unwrap(), Value::Bool(true));
        assert_eq!(eval("item.name === 'Ada'", &scope).unwrap(), Value::Bool(true));
        assert_eq!(eval("[1, 2] == [1, 2]", &scope).unwrap(), Value::Bool(true));
        assert!(eval("[1] < 2", &scope).is_err());
    }

    #[test]
    fn builtins() {
        let scope = item_scope();
        assert_eq!(eval("len(item.tags)", &scope).unwrap(), Value::from(2i64));
        assert_eq!(eval("upper(item.name)", &scope).unwrap(), Value::from("ADA"));
        assert_eq!(eval("contains(item.tags, 'x')", &scope).unwrap(), Value::Bool(true));
        assert_eq!(eval("join(split('a-b-c', '-'), '+')", &scope).unwrap(), Value::from("a+b+c"));
        assert_eq!(eval("keys({b: 1, a: 2})", &scope).unwrap(), json(r#"["a", "b"]"#));
        assert_eq!(eval("max(3, 9, 4)", &scope).unwrap(), Value::from(9i64));
        assert_eq!(eval("sum([1, 2, 3])", &scope).unwrap(), Value::from(6i64));
        assert_eq!(eval("round(2.5)", &scope).unwrap(), Value::from(3i64));
        assert_eq!(eval("type(item.tags)", &scope).unwrap(), Value::from("array"));
        assert_eq!(eval("concat([1], 2, [3])", &scope).unwrap(), json("[1, 2, 3]"));
        assert_eq!(eval("get(item, 'tags.0')", &scope).unwrap(), Value::from("x"));
        assert_eq!(eval("get(item, 'nope', 'fallback')", &scope).unwrap(), Value::from("fallback"));
        assert_eq!(eval("num('42')", &scope).unwrap(), Value::from(42i64));
    }

    #[test]
    fn builtin_errors() {
        let scope = Scope::new();
        assert!(matches!(eval("nope(1)", &scope), Err(ExprError::UnknownFunction(_))));
        assert!(matches!(eval("len()", &scope), Err(ExprError::Arity { got: 0, .. })));
        assert!(matches!(eval("upper(1)", &scope), Err(ExprError::Type(_))));
        assert!(matches!(eval("1 / 0", &scope), Err(ExprError::Type(_))));
    }

    #[test]
    fn evaluation_is_budgeted() {
        let big: Vec<Value> = (0..MAX_STEPS as i64 + 1).map(Value::from).collect();
        let scope = Scope::new().with("xs", Value::Array(big));
        assert!(matches!(eval("sum(xs)", &scope), Err(ExprError::BudgetExceeded(_))));

        let small = Scope::new().with("xs", json("[1, 2, 3]"));
        assert_eq!(eval("sum(xs)", &small).unwrap(), Value::from(6i64));
    }
}
