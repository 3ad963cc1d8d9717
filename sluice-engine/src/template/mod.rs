// Template Engine
// Jinja-style statement templates with soft undefined variables

pub mod error;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod renderer;

pub use error::{TemplateError, TemplateErrorKind};
pub use functions::Builtins;
pub use parser::{Expr, Node, Template};
pub use renderer::Renderer;

use crate::parser::models::Variables;

/// Entry point for rendering template text
#[derive(Debug, Default, Clone)]
pub struct TemplateEngine {
    builtins: Builtins,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `source` against `variables`. Undefined variables are left in
    /// place as `{{name}}` placeholders.
    pub fn render(&self, source: &str, variables: &Variables) -> Result<String, TemplateError> {
        let template = Template::parse(source)?;
        Renderer::new(variables, self.builtins).render(&template)
    }
}

/// Render with a default engine
pub fn render(source: &str, variables: &Variables) -> Result<String, TemplateError> {
    TemplateEngine::new().render(source, variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::models::Value;

    #[test]
    fn test_soft_undefined_is_idempotent() {
        let variables = Variables::new();
        let once = render("select * from t where x = {{foo}}", &variables).unwrap();
        let twice = render(&once, &variables).unwrap();
        assert_eq!(once, "select * from t where x = {{foo}}");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_staged_rendering_fills_placeholders() {
        let mut first = Variables::new();
        first.insert("schema".to_string(), Value::from("sales"));
        let staged = render("select * from {{ schema }}.{{ table }}", &first).unwrap();
        assert_eq!(staged, "select * from sales.{{table}}");

        let mut second = Variables::new();
        second.insert("table".to_string(), Value::from("orders"));
        assert_eq!(render(&staged, &second).unwrap(), "select * from sales.orders");
    }

    #[test]
    fn test_current_date_available_without_variables() {
        let out = render("{{ current_date('%Y') }}", &Variables::new()).unwrap();
        assert_eq!(out.len(), 4);
    }
}
