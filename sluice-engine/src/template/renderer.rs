// Template Renderer
// Evaluates a parsed template against variables with soft undefined semantics

use crate::parser::models::{Value, Variables};
use crate::template::error::TemplateError;
use crate::template::functions::Builtins;
use crate::template::parser::{BinaryOp, Expr, Node, Template, UnaryOp};

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Result of evaluating an expression: a value, or a reference to a
/// variable nobody supplied yet
#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    Defined(Value),
    Undefined,
}

impl Resolved {
    fn is_truthy(&self) -> bool {
        match self {
            Resolved::Defined(value) => value.is_truthy(),
            Resolved::Undefined => false,
        }
    }
}

/// Renders a parsed template. `{{ expr }}` blocks whose expression touches
/// an undefined variable are re-emitted as `{{expr}}` so a later pass can
/// fill them in.
pub struct Renderer<'a> {
    variables: &'a Variables,
    builtins: Builtins,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'a> Renderer<'a> {
    pub fn new(variables: &'a Variables, builtins: Builtins) -> Self {
        Self {
            variables,
            builtins,
            scopes: Vec::new(),
        }
    }

    pub fn render(&mut self, template: &Template) -> Result<String, TemplateError> {
        let mut output = String::new();
        self.render_nodes(&template.nodes, &mut output)?;
        Ok(output)
    }

    fn render_nodes(&mut self, nodes: &[Node], output: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => output.push_str(text),
                Node::Output { expr, source } => match self.eval(expr)? {
                    Resolved::Defined(value) => output.push_str(&value.as_string()),
                    Resolved::Undefined => {
                        output.push_str("{{");
                        output.push_str(source);
                        output.push_str("}}");
                    }
                },
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for (condition, body) in branches {
                        if self.eval(condition)?.is_truthy() {
                            self.render_nodes(body, output)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.render_nodes(otherwise, output)?;
                    }
                }
                Node::For {
                    target,
                    iterable,
                    body,
                    otherwise,
                } => self.render_for(target, iterable, body, otherwise, output)?,
            }
        }
        Ok(())
    }

    fn render_for(
        &mut self,
        target: &str,
        iterable: &Expr,
        body: &[Node],
        otherwise: &[Node],
        output: &mut String,
    ) -> Result<(), TemplateError> {
        let items = match self.eval(iterable)? {
            Resolved::Undefined => {
                return Err(TemplateError::evaluation(
                    "cannot iterate over an undefined value",
                ))
            }
            Resolved::Defined(Value::Array(items)) => items,
            Resolved::Defined(Value::Object(map)) => map.into_keys().map(Value::String).collect(),
            Resolved::Defined(Value::Null) => Vec::new(),
            Resolved::Defined(other) => {
                return Err(TemplateError::evaluation(format!(
                    "cannot iterate over {}",
                    other.type_name()
                )))
            }
        };

        if items.is_empty() {
            return self.render_nodes(otherwise, output);
        }

        let length = items.len();
        for (index, item) in items.into_iter().enumerate() {
            let mut scope = HashMap::new();
            scope.insert(target.to_string(), item);
            scope.insert("loop".to_string(), loop_value(index, length));
            self.scopes.push(scope);
            let result = self.render_nodes(body, output);
            self.scopes.pop();
            result?;
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.variables.get(name))
    }

    fn eval(&self, expr: &Expr) -> Result<Resolved, TemplateError> {
        match expr {
            Expr::Literal(value) => Ok(Resolved::Defined(value.clone())),

            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.eval(item)? {
                        Resolved::Defined(value) => values.push(value),
                        Resolved::Undefined => return Ok(Resolved::Undefined),
                    }
                }
                Ok(Resolved::Defined(Value::Array(values)))
            }

            Expr::Variable(name) => Ok(match self.lookup(name) {
                Some(value) => Resolved::Defined(value.clone()),
                None => Resolved::Undefined,
            }),

            Expr::Member { object, property } => {
                let Resolved::Defined(object) = self.eval(object)? else {
                    return Ok(Resolved::Undefined);
                };
                Ok(member(&object, property))
            }

            Expr::Index { object, index } => {
                let (Resolved::Defined(object), Resolved::Defined(index)) =
                    (self.eval(object)?, self.eval(index)?)
                else {
                    return Ok(Resolved::Undefined);
                };
                Ok(index_value(&object, &index))
            }

            Expr::Call { name, args } => {
                let Some(args) = self.eval_args(args)? else {
                    return Ok(Resolved::Undefined);
                };
                self.builtins.call(name, args).map(Resolved::Defined)
            }

            Expr::Filter { expr, name, args } => {
                let input = self.eval(expr)?;
                let Some(args) = self.eval_args(args)? else {
                    return Ok(Resolved::Undefined);
                };
                match input {
                    Resolved::Defined(value) => {
                        self.builtins.filter(name, value, args).map(Resolved::Defined)
                    }
                    Resolved::Undefined if name == "default" => Ok(Resolved::Defined(
                        args.into_iter().next().unwrap_or_default(),
                    )),
                    Resolved::Undefined => Ok(Resolved::Undefined),
                }
            }

            Expr::Unary { op, expr } => {
                let operand = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Resolved::Defined(Value::Bool(!operand.is_truthy()))),
                    UnaryOp::Neg => match operand {
                        Resolved::Defined(Value::Integer(i)) => Ok(Resolved::Defined(
                            i.checked_neg()
                                .map_or(Value::Number(-(i as f64)), Value::Integer),
                        )),
                        Resolved::Defined(value) => match value.as_number() {
                            Some(n) => Ok(Resolved::Defined(Value::Number(-n))),
                            None => Err(TemplateError::evaluation(format!(
                                "cannot negate {}",
                                value.type_name()
                            ))),
                        },
                        Resolved::Undefined => Ok(Resolved::Undefined),
                    },
                }
            }

            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
        }
    }

    /// Evaluate call arguments; `None` when any argument is undefined
    fn eval_args(&self, args: &[Expr]) -> Result<Option<Vec<Value>>, TemplateError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match self.eval(arg)? {
                Resolved::Defined(value) => values.push(value),
                Resolved::Undefined => return Ok(None),
            }
        }
        Ok(Some(values))
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Resolved, TemplateError> {
        // Logical operators short-circuit and yield an operand, like Jinja
        match op {
            BinaryOp::And => {
                let left = self.eval(left)?;
                return if left.is_truthy() { self.eval(right) } else { Ok(left) };
            }
            BinaryOp::Or => {
                let left = self.eval(left)?;
                return if left.is_truthy() { Ok(left) } else { self.eval(right) };
            }
            _ => {}
        }

        let (Resolved::Defined(left), Resolved::Defined(right)) =
            (self.eval(left)?, self.eval(right)?)
        else {
            return Ok(Resolved::Undefined);
        };

        let value = match op {
            BinaryOp::Concat => Value::String(format!("{}{}", left.as_string(), right.as_string())),
            BinaryOp::Add => add(left, right)?,
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                arithmetic(op, &left, &right)?
            }
            BinaryOp::Eq => Value::Bool(left == right),
            BinaryOp::Ne => Value::Bool(left != right),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&left, &right).ok_or_else(|| {
                    TemplateError::evaluation(format!(
                        "cannot compare {} {} {}",
                        left.type_name(),
                        op,
                        right.type_name()
                    ))
                })?;
                Value::Bool(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
            BinaryOp::In => Value::Bool(contains(&right, &left)?),
            BinaryOp::NotIn => Value::Bool(!contains(&right, &left)?),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };

        Ok(Resolved::Defined(value))
    }
}

fn loop_value(index: usize, length: usize) -> Value {
    let mut map = BTreeMap::new();
    map.insert("index".to_string(), Value::Integer(index as i64 + 1));
    map.insert("index0".to_string(), Value::Integer(index as i64));
    map.insert("first".to_string(), Value::Bool(index == 0));
    map.insert("last".to_string(), Value::Bool(index + 1 == length));
    map.insert("length".to_string(), Value::Integer(length as i64));
    Value::Object(map)
}

fn member(object: &Value, property: &str) -> Resolved {
    match object {
        Value::Object(map) => map
            .get(property)
            .cloned()
            .map_or(Resolved::Undefined, Resolved::Defined),
        _ => Resolved::Undefined,
    }
}

fn index_value(object: &Value, index: &Value) -> Resolved {
    match (object, index) {
        (Value::Array(items), Value::Integer(_) | Value::Number(_)) => {
            let i = match index {
                Value::Integer(i) => *i,
                Value::Number(n) if n.fract() == 0.0 => *n as i64,
                _ => return Resolved::Undefined,
            };
            let i = if i < 0 { items.len() as i64 + i } else { i };
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .map_or(Resolved::Undefined, Resolved::Defined)
        }
        (Value::Object(_), key) => member(object, &key.as_string()),
        _ => Resolved::Undefined,
    }
}

fn add(left: Value, right: Value) -> Result<Value, TemplateError> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(a
            .checked_add(b)
            .map_or(Value::Number(a as f64 + b as f64), Value::Integer)),
        (a, b) if a.is_number() && b.is_number() => Ok(Value::Number(
            a.as_number().unwrap_or_default() + b.as_number().unwrap_or_default(),
        )),
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (a, b) => Err(TemplateError::evaluation(format!(
            "cannot add {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, TemplateError> {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        let exact = match op {
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            BinaryOp::Mod if *b != 0 => a.checked_rem(*b),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(Value::Integer(n));
        }
    }

    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(TemplateError::evaluation(format!(
            "cannot apply '{}' to {} and {}",
            op,
            left.type_name(),
            right.type_name()
        )));
    };

    let result = match op {
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
            return Err(TemplateError::evaluation("division by zero"))
        }
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    Ok(Value::Number(result))
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (a, b) if a.is_number() && b.is_number() => a.as_number()?.partial_cmp(&b.as_number()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, TemplateError> {
    match container {
        Value::Array(items) => Ok(items.contains(needle)),
        Value::String(s) => Ok(s.contains(&needle.as_string())),
        Value::Object(map) => Ok(map.contains_key(&needle.as_string())),
        other => Err(TemplateError::evaluation(format!(
            "'in' requires a list, string or mapping, found {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str, variables: &Variables) -> Result<String, TemplateError> {
        let template = Template::parse(source)?;
        Renderer::new(variables, Builtins::new()).render(&template)
    }

    fn vars(pairs: &[(&str, Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_defined_variable() {
        let variables = vars(&[("this", Value::from("public.orders"))]);
        assert_eq!(
            render("select * from {{ this }}", &variables).unwrap(),
            "select * from public.orders"
        );
    }

    #[test]
    fn test_large_integer_ids_render_exactly() {
        let ids = Value::from(vec![1234567890123456789i64, 9007199254740993]);
        let variables = vars(&[("ids", ids)]);
        assert_eq!(
            render("where id in ({{ ids | join(', ') }})", &variables).unwrap(),
            "where id in (1234567890123456789, 9007199254740993)"
        );
        assert_eq!(
            render("{{ ids[1] + 1 }} {{ ids[0] > ids[1] }}", &variables).unwrap(),
            "9007199254740994 true"
        );
    }

    #[test]
    fn test_undefined_renders_placeholder() {
        let variables = Variables::new();
        assert_eq!(render("a {{ foo }} b", &variables).unwrap(), "a {{foo}} b");
        assert_eq!(
            render("{{ foo | upper }}", &variables).unwrap(),
            "{{foo | upper}}"
        );
    }

    #[test]
    fn test_undefined_member_renders_placeholder() {
        let mut config = BTreeMap::new();
        config.insert("a".to_string(), Value::from(1i64));
        let variables = vars(&[("config", Value::Object(config))]);
        assert_eq!(render("{{ config.b }}", &variables).unwrap(), "{{config.b}}");
        assert_eq!(render("{{ config.a }}", &variables).unwrap(), "1");
    }

    #[test]
    fn test_default_filter_on_undefined() {
        let variables = Variables::new();
        assert_eq!(
            render("{{ limit | default(100) }}", &variables).unwrap(),
            "100"
        );
    }

    #[test]
    fn test_if_with_undefined_is_falsy() {
        let variables = vars(&[("full", Value::Bool(true))]);
        assert_eq!(
            render("{% if missing %}x{% elif full %}y{% endif %}", &variables).unwrap(),
            "y"
        );
        assert_eq!(
            render("{% if not missing %}z{% endif %}", &variables).unwrap(),
            "z"
        );
    }

    #[test]
    fn test_for_loop_with_loop_variables() {
        let variables = vars(&[("cols", Value::from(vec!["a", "b", "c"]))]);
        let out = render(
            "{% for c in cols %}{{ c }}{% if not loop.last %}, {% endif %}{% endfor %}",
            &variables,
        )
        .unwrap();
        assert_eq!(out, "a, b, c");
    }

    #[test]
    fn test_for_else_on_empty() {
        let variables = vars(&[("cols", Value::Array(vec![]))]);
        assert_eq!(
            render("{% for c in cols %}{{ c }}{% else %}*{% endfor %}", &variables).unwrap(),
            "*"
        );
    }

    #[test]
    fn test_for_over_undefined_is_error() {
        let variables = Variables::new();
        assert!(render("{% for c in cols %}{{ c }}{% endfor %}", &variables).is_err());
    }

    #[test]
    fn test_concat_and_comparison() {
        let variables = vars(&[("n", Value::from(3i64)), ("s", Value::from("x"))]);
        assert_eq!(render("{{ s ~ '_' ~ n }}", &variables).unwrap(), "x_3");
        assert_eq!(render("{{ n > 2 and n <= 3 }}", &variables).unwrap(), "true");
        assert_eq!(render("{{ 'x' in ['x', 'y'] }}", &variables).unwrap(), "true");
    }

    #[test]
    fn test_list_renders_as_json() {
        let variables = vars(&[("regions", Value::from(vec!["us", "eu"]))]);
        assert_eq!(render("{{ regions }}", &variables).unwrap(), r#"["us","eu"]"#);
    }

    #[test]
    fn test_division_by_zero_is_error() {
        let variables = Variables::new();
        assert!(render("{{ 1 / 0 }}", &variables).is_err());
    }
}
