//! Rows and output parameters of a response.

use std::sync::Arc;

use tds5_protocol::{ColumnFormat, RowFormat, SqlValue};

/// One row of a result set.
///
/// Shares its [`RowFormat`] with every other row of the same result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    format: Arc<RowFormat>,
    values: Vec<SqlValue>,
}

impl Row {
    pub(crate) fn new(format: Arc<RowFormat>, values: Vec<SqlValue>) -> Self {
        Self { format, values }
    }

    /// Column descriptions.
    #[must_use]
    pub fn columns(&self) -> &[ColumnFormat] {
        &self.format.columns
    }

    /// The shared format of this row's result set.
    #[must_use]
    pub fn format(&self) -> &Arc<RowFormat> {
        &self.format
    }

    /// Value of column `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Value of the column labelled `name` (case-insensitive).
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&SqlValue> {
        self.format.position(name).and_then(|i| self.values.get(i))
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume into the values.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A value returned through an output parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParameter {
    /// Parameter name as sent by the server, usually with a leading `@`.
    pub name: String,
    /// Returned value.
    pub value: SqlValue,
}

/// Output parameters of a procedure call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputParameters(pub Vec<OutputParameter>);

impl OutputParameters {
    /// Find a parameter by name, ignoring case and a leading `@`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        let wanted = name.trim_start_matches('@');
        self.0
            .iter()
            .find(|p| p.name.trim_start_matches('@').eq_ignore_ascii_case(wanted))
            .map(|p| &p.value)
    }

    /// Iterate in server order.
    pub fn iter(&self) -> std::slice::Iter<'_, OutputParameter> {
        self.0.iter()
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are none.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> Arc<RowFormat> {
        Arc::new(RowFormat {
            wide: false,
            columns: vec![
                ColumnFormat {
                    name: "id".into(),
                    ..ColumnFormat::default()
                },
                ColumnFormat {
                    name: "Name".into(),
                    ..ColumnFormat::default()
                },
            ],
        })
    }

    #[test]
    fn test_row_access() {
        let row = Row::new(format(), vec![SqlValue::Int(7), SqlValue::from("seven")]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&SqlValue::Int(7)));
        assert_eq!(row.get_by_name("name").and_then(SqlValue::as_str), Some("seven"));
        assert!(row.get(2).is_none());
        assert!(row.get_by_name("missing").is_none());
    }

    #[test]
    fn test_output_parameter_lookup() {
        let params = OutputParameters(vec![OutputParameter {
            name: "@Total".into(),
            value: SqlValue::Int(3),
        }]);
        assert_eq!(params.get("total"), Some(&SqlValue::Int(3)));
        assert_eq!(params.get("@TOTAL"), Some(&SqlValue::Int(3)));
        assert!(params.get("other").is_none());
    }
}
