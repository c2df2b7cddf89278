//! Recognized template variables and their parameter rules.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;
use std::str::FromStr;

use crate::error::{
    InvalidParameterValueSnafu, MissingParameterSnafu, TemplateError, UnknownVariableSnafu,
    UnsupportedParameterSnafu,
};

/// Width used when `start_offset` is rendered with `padding=true`.
///
/// Matches the number of decimal digits of the largest 64-bit signed offset.
pub const DEFAULT_OFFSET_PADDING: usize = 20;

/// Variables a key template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    Topic,
    Partition,
    StartOffset,
    Timestamp,
    UtcDate,
    LocalDate,
}

impl Variable {
    pub const ALL: [Variable; 6] = [
        Variable::Topic,
        Variable::Partition,
        Variable::StartOffset,
        Variable::Timestamp,
        Variable::UtcDate,
        Variable::LocalDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variable::Topic => "topic",
            Variable::Partition => "partition",
            Variable::StartOffset => "start_offset",
            Variable::Timestamp => "timestamp",
            Variable::UtcDate => "utc_date",
            Variable::LocalDate => "local_date",
        }
    }

    /// Check a placeholder's parameter against what this variable accepts.
    pub(crate) fn validate(&self, parameter: Option<&Parameter>) -> Result<(), TemplateError> {
        match (self, parameter) {
            (Variable::StartOffset, None) => Ok(()),
            (Variable::StartOffset, Some(p)) => {
                ensure!(
                    p.name == "padding",
                    UnsupportedParameterSnafu {
                        variable: self.as_str(),
                        parameter: p.name.clone(),
                    }
                );
                OffsetPadding::parse(&p.value).map(|_| ())
            }
            (Variable::Timestamp, None) => MissingParameterSnafu {
                variable: self.as_str(),
                parameter: "unit",
            }
            .fail(),
            (Variable::Timestamp, Some(p)) => {
                ensure!(
                    p.name == "unit",
                    UnsupportedParameterSnafu {
                        variable: self.as_str(),
                        parameter: p.name.clone(),
                    }
                );
                TimestampUnit::parse(&p.value).map(|_| ())
            }
            (_, None) => Ok(()),
            (_, Some(p)) => UnsupportedParameterSnafu {
                variable: self.as_str(),
                parameter: p.name.clone(),
            }
            .fail(),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variable {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variable::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .context(UnknownVariableSnafu { name: s })
    }
}

/// A `name=value` parameter attached to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Zero-padding applied to a rendered offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetPadding {
    None,
    Width(usize),
}

impl OffsetPadding {
    /// Parse a `padding` parameter value: `true`, `false` or a width.
    pub fn parse(value: &str) -> Result<Self, TemplateError> {
        match value {
            "true" => Ok(OffsetPadding::Width(DEFAULT_OFFSET_PADDING)),
            "false" => Ok(OffsetPadding::None),
            width => width
                .parse::<usize>()
                .map(OffsetPadding::Width)
                .ok()
                .context(InvalidParameterValueSnafu {
                    variable: Variable::StartOffset.as_str(),
                    parameter: "padding",
                    value: width,
                }),
        }
    }

    pub fn from_parameter(parameter: Option<&Parameter>) -> Result<Self, TemplateError> {
        parameter.map_or(Ok(OffsetPadding::None), |p| Self::parse(&p.value))
    }

    pub fn format(&self, offset: u64) -> String {
        match self {
            OffsetPadding::None => offset.to_string(),
            OffsetPadding::Width(width) => format!("{offset:0width$}"),
        }
    }
}

/// Calendar unit extracted by the `timestamp` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUnit {
    Year,
    Month,
    Day,
    Hour,
}

impl TimestampUnit {
    pub fn parse(value: &str) -> Result<Self, TemplateError> {
        match value {
            "yyyy" => Ok(TimestampUnit::Year),
            "MM" => Ok(TimestampUnit::Month),
            "dd" => Ok(TimestampUnit::Day),
            "HH" => Ok(TimestampUnit::Hour),
            other => InvalidParameterValueSnafu {
                variable: Variable::Timestamp.as_str(),
                parameter: "unit",
                value: other,
            }
            .fail(),
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            TimestampUnit::Year => "%Y",
            TimestampUnit::Month => "%m",
            TimestampUnit::Day => "%d",
            TimestampUnit::Hour => "%H",
        }
    }

    pub fn format<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> String
    where
        Tz::Offset: fmt::Display,
    {
        at.format(self.pattern()).to_string()
    }
}

/// Where the `timestamp` variable takes its instant from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimestampSource {
    /// Current time at render.
    #[default]
    Wallclock,
    /// The timestamp embedded in the record.
    Record,
}
