//! Variable bindings supplied at render time.

use chrono::{DateTime, Local, Utc};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use super::variables::{OffsetPadding, Parameter, TimestampSource, TimestampUnit, Variable};
use crate::error::{MissingTimestampSnafu, TemplateError};
use crate::record::Record;

/// Lazily evaluated value for one variable.
pub type Resolver<'a> = Box<dyn Fn(Option<&Parameter>) -> Result<String, TemplateError> + 'a>;

/// Source of the current time for wall-clock variables.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Set of variable bindings for one render.
#[derive(Default)]
pub struct RenderContext<'a> {
    bindings: HashMap<Variable, Resolver<'a>>,
}

impl<'a> RenderContext<'a> {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind a resolver to a variable, replacing any previous binding.
    pub fn bind(
        mut self,
        variable: Variable,
        resolver: impl Fn(Option<&Parameter>) -> Result<String, TemplateError> + 'a,
    ) -> Self {
        self.bindings.insert(variable, Box::new(resolver));
        self
    }

    pub fn resolver(&self, variable: Variable) -> Option<&Resolver<'a>> {
        self.bindings.get(&variable)
    }
}

impl std::fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.bindings.keys()).finish()
    }
}

/// Bind every recognized variable to the metadata of `record`.
///
/// The clock is only consulted when a wall-clock variable is rendered.
pub fn record_context<'a>(
    record: &'a Record,
    timestamp_source: TimestampSource,
    clock: &'a Clock,
) -> RenderContext<'a> {
    RenderContext::new()
        .bind(Variable::Topic, move |_| Ok(record.topic.clone()))
        .bind(Variable::Partition, move |_| Ok(record.partition.to_string()))
        .bind(Variable::StartOffset, move |parameter| {
            Ok(OffsetPadding::from_parameter(parameter)?.format(record.offset))
        })
        .bind(Variable::Timestamp, move |parameter| {
            let unit = match parameter {
                Some(p) => TimestampUnit::parse(&p.value)?,
                None => TimestampUnit::Day,
            };
            let at = match timestamp_source {
                TimestampSource::Wallclock => clock(),
                TimestampSource::Record => record.timestamp.context(MissingTimestampSnafu {
                    offset: record.offset,
                })?,
            };
            Ok(unit.format(&at))
        })
        .bind(Variable::UtcDate, move |_| {
            Ok(clock().format("%Y-%m-%d").to_string())
        })
        .bind(Variable::LocalDate, move |_| {
            Ok(clock().with_timezone(&Local).format("%Y-%m-%d").to_string())
        })
}
