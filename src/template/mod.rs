//! Object key templates.
//!
//! A template is literal text interleaved with placeholders of the form
//! `{{ name }}` or `{{ name:parameter=value }}`. Templates are compiled once
//! from configuration and rendered against a [`RenderContext`] for every new
//! object.
//!
//! # Example
//!
//! ```
//! use flurry::template::{KeyTemplate, RenderContext, Variable};
//!
//! let template = KeyTemplate::parse("{{topic}}/date={{utc_date}}/").unwrap();
//! let context = RenderContext::new()
//!     .bind(Variable::Topic, |_| Ok("orders".to_string()))
//!     .bind(Variable::UtcDate, |_| Ok("2026-01-28".to_string()));
//! assert_eq!(template.render(&context).unwrap(), "orders/date=2026-01-28/");
//! ```

mod context;
mod variables;

pub use context::{Clock, RenderContext, Resolver, record_context};
pub use variables::{
    DEFAULT_OFFSET_PADDING, OffsetPadding, Parameter, TimestampSource, TimestampUnit, Variable,
};

use regex::Regex;
use snafu::prelude::*;
use std::fmt;
use std::sync::LazyLock;

use crate::error::{MalformedPlaceholderSnafu, TemplateError, UnboundVariableSnafu};

/// Matches any `{{ ... }}` placeholder; the body is validated separately.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("Invalid placeholder regex"));

/// Strict grammar for a placeholder body.
static PLACEHOLDER_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)(?::(\w+)=(\w+))?\s*$").expect("Invalid placeholder body regex")
});

/// One compiled piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    Variable {
        variable: Variable,
        parameter: Option<Parameter>,
    },
}

/// A compiled key template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    parts: Vec<TemplatePart>,
}

impl KeyTemplate {
    /// Compile a template, rejecting malformed placeholders, unknown
    /// variables and invalid parameters.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut last = 0;

        for placeholder in PLACEHOLDER.find_iter(text) {
            if placeholder.start() > last {
                parts.push(TemplatePart::Literal(
                    text[last..placeholder.start()].to_string(),
                ));
            }
            parts.push(Self::parse_placeholder(placeholder.as_str())?);
            last = placeholder.end();
        }

        let tail = &text[last..];
        ensure!(
            !tail.contains("{{"),
            MalformedPlaceholderSnafu {
                placeholder: tail.to_string()
            }
        );
        if !tail.is_empty() {
            parts.push(TemplatePart::Literal(tail.to_string()));
        }

        Ok(Self {
            source: text.to_string(),
            parts,
        })
    }

    fn parse_placeholder(placeholder: &str) -> Result<TemplatePart, TemplateError> {
        let body = &placeholder[2..placeholder.len() - 2];
        let captures = PLACEHOLDER_BODY
            .captures(body)
            .context(MalformedPlaceholderSnafu { placeholder })?;

        let variable: Variable = captures[1].parse()?;
        let parameter = match (captures.get(2), captures.get(3)) {
            (Some(name), Some(value)) => Some(Parameter::new(name.as_str(), value.as_str())),
            _ => None,
        };
        variable.validate(parameter.as_ref())?;

        Ok(TemplatePart::Variable {
            variable,
            parameter,
        })
    }

    /// Render the template, invoking resolvers only for referenced variables.
    pub fn render(&self, context: &RenderContext<'_>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => out.push_str(text),
                TemplatePart::Variable {
                    variable,
                    parameter,
                } => {
                    let resolver = context.resolver(*variable).context(UnboundVariableSnafu {
                        name: variable.as_str(),
                    })?;
                    out.push_str(&resolver(parameter.as_ref())?);
                }
            }
        }
        Ok(out)
    }

    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    /// Variables referenced by this template, in template order.
    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Variable { variable, .. } => Some(*variable),
            TemplatePart::Literal(_) => None,
        })
    }

    /// The text the template was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_parse_literal_only() {
        let template = KeyTemplate::parse("static/prefix/").unwrap();
        assert_eq!(
            template.parts(),
            &[TemplatePart::Literal("static/prefix/".to_string())]
        );
        assert_eq!(template.variables().count(), 0);
    }

    #[test]
    fn test_parse_mixed_parts() {
        let template =
            KeyTemplate::parse("topic={{ topic }}/{{start_offset:padding=true}}-x").unwrap();
        assert_eq!(
            template.parts(),
            &[
                TemplatePart::Literal("topic=".to_string()),
                TemplatePart::Variable {
                    variable: Variable::Topic,
                    parameter: None,
                },
                TemplatePart::Literal("/".to_string()),
                TemplatePart::Variable {
                    variable: Variable::StartOffset,
                    parameter: Some(Parameter::new("padding", "true")),
                },
                TemplatePart::Literal("-x".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_empty_template() {
        let template = KeyTemplate::parse("").unwrap();
        assert!(template.parts().is_empty());
        assert_eq!(template.render(&RenderContext::new()).unwrap(), "");
    }

    #[test]
    fn test_parse_rejects_unknown_variable() {
        let err = KeyTemplate::parse("{{topc}}/").unwrap_err();
        assert!(matches!(err, TemplateError::UnknownVariable { ref name } if name == "topc"));
    }

    #[test]
    fn test_parse_rejects_malformed_parameter() {
        for text in [
            "{{start_offset:padding}}",
            "{{start_offset:=true}}",
            "{{ }}",
            "{{topic",
            "{{start_offset:padding=true:x=y}}",
        ] {
            let err = KeyTemplate::parse(text).unwrap_err();
            assert!(
                matches!(err, TemplateError::MalformedPlaceholder { .. }),
                "expected malformed placeholder for {text}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_invalid_parameter_value() {
        assert!(matches!(
            KeyTemplate::parse("{{start_offset:padding=yes}}"),
            Err(TemplateError::InvalidParameterValue { .. })
        ));
        assert!(matches!(
            KeyTemplate::parse("{{timestamp:unit=weeks}}"),
            Err(TemplateError::InvalidParameterValue { .. })
        ));
    }

    #[test]
    fn test_render_literal_invokes_no_resolver() {
        let calls = Cell::new(0);
        let context = RenderContext::new().bind(Variable::Topic, |_| {
            calls.set(calls.get() + 1);
            Ok("never".to_string())
        });

        let template = KeyTemplate::parse("fixed/key").unwrap();
        assert_eq!(template.render(&context).unwrap(), "fixed/key");
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_render_passes_parameter_to_resolver() {
        let context = RenderContext::new().bind(Variable::StartOffset, |parameter| {
            Ok(OffsetPadding::from_parameter(parameter)?.format(7))
        });
        let template = KeyTemplate::parse("{{start_offset:padding=5}}").unwrap();
        assert_eq!(template.render(&context).unwrap(), "00007");
    }

    #[test]
    fn test_render_unbound_variable() {
        let template = KeyTemplate::parse("{{partition}}").unwrap();
        let err = template.render(&RenderContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::UnboundVariable { ref name } if name == "partition"));
    }

    #[test]
    fn test_render_repeated_variable() {
        let context = RenderContext::new().bind(Variable::Topic, |_| Ok("t".to_string()));
        let template = KeyTemplate::parse("{{topic}}/{{topic}}").unwrap();
        assert_eq!(template.render(&context).unwrap(), "t/t");
    }
}
