//! Identifier validation and quoting for SQL Server.
//!
//! Table, column and schema names cannot be bound as parameters, so every
//! identifier spliced into generated SQL goes through [`quote_mssql`]:
//! validated for suspicious content, wrapped in brackets, and with closing
//! brackets doubled.

use std::fmt;

use crate::error::{LoaderError, Result};

/// SQL Server's identifier length limit (`sysname`).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes
/// - Identifiers longer than 128 characters
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LoaderError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(LoaderError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    let chars = name.chars().count();
    if chars > MAX_IDENTIFIER_LENGTH {
        return Err(LoaderError::Config(format!(
            "Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH, chars, name
        )));
    }

    Ok(())
}

/// Validate a column type spliced into `CREATE TABLE`.
///
/// Accepts one or more type-name words with an optional argument list of
/// integers or `max`: `bigint`, `double precision`, `nvarchar(max)`,
/// `decimal(18, 4)`. Anything else is rejected.
pub fn validate_column_type(ty: &str) -> Result<()> {
    let reject = || {
        Err(LoaderError::Config(format!(
            "SECURITY: invalid column type (expected NAME or NAME(ARGS)): {:?}",
            ty
        )))
    };

    let ty = ty.trim();
    let (name, args) = match ty.split_once('(') {
        Some((name, rest)) => match rest.strip_suffix(')') {
            Some(args) => (name.trim_end(), Some(args)),
            None => return reject(),
        },
        None => (ty, None),
    };

    let name_ok = !name.is_empty()
        && name.split(' ').all(|word| {
            let mut chars = word.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    let args_ok = args.map_or(true, |args| {
        args.split(',').all(|arg| {
            let arg = arg.trim();
            arg.eq_ignore_ascii_case("max")
                || (!arg.is_empty() && arg.chars().all(|c| c.is_ascii_digit()))
        })
    });

    if name_ok && args_ok {
        Ok(())
    } else {
        reject()
    }
}

/// Quote a SQL Server identifier using brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with schema.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Quote a list of column names and join them with `", "`.
pub fn quote_column_list<S: AsRef<str>>(columns: &[S]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_mssql(c.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub table: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            table: table.into(),
        }
    }

    /// A bare table name resolved against the session's default schema.
    pub fn unqualified(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
        }
    }

    /// Quoted form, `[schema].[table]` or `[table]`.
    pub fn render(&self) -> Result<String> {
        match self.schema.as_deref().filter(|s| !s.is_empty()) {
            Some(schema) => qualify_mssql(schema, &self.table),
            None => quote_mssql(&self.table),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.schema.as_deref().filter(|s| !s.is_empty()) {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => f.write_str(&self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
        assert!(validate_identifier("日本語").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("table\0name");
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_length_limit() {
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
        let result = validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1));
        assert!(result.unwrap_err().to_string().contains("maximum length"));
        // Counted in characters, not bytes.
        assert!(validate_identifier(&"é".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
    }

    #[test]
    fn test_validate_column_type_accepts_plain_types() {
        for ty in [
            "bigint",
            "nvarchar(max)",
            "decimal(18, 4)",
            "datetime2(7)",
            "double precision",
            "varbinary(255)",
        ] {
            assert!(validate_column_type(ty).is_ok(), "{}", ty);
        }
    }

    #[test]
    fn test_validate_column_type_rejects_injection() {
        for ty in [
            "",
            "int; DROP TABLE users",
            "int -- comment",
            "int) ; DROP TABLE x; --",
            "varchar(10))",
            "decimal(18, x)",
            "nvarchar(max",
            "int default 1/0",
        ] {
            assert!(validate_column_type(ty).is_err(), "{}", ty);
        }
    }

    #[test]
    fn test_quote_mssql_escapes_bracket() {
        assert_eq!(quote_mssql("users").unwrap(), "[users]");
        assert_eq!(quote_mssql("a]b]c").unwrap(), "[a]]b]]c]");
    }

    #[test]
    fn test_quote_mssql_sql_injection_safely_quoted() {
        let result = quote_mssql("Robert]; DROP TABLE Students;--").unwrap();
        assert_eq!(result, "[Robert]]; DROP TABLE Students;--]");
    }

    #[test]
    fn test_qualified_name_render() {
        assert_eq!(QualifiedName::new("dbo", "users").render().unwrap(), "[dbo].[users]");
        assert_eq!(QualifiedName::unqualified("users").render().unwrap(), "[users]");
        assert_eq!(QualifiedName::new("", "users").render().unwrap(), "[users]");
        assert_eq!(QualifiedName::new("sales", "orders").to_string(), "sales.orders");
    }

    #[test]
    fn test_quote_column_list() {
        assert_eq!(quote_column_list(&["id", "na]me"]).unwrap(), "[id], [na]]me]");
        assert!(quote_column_list(&["ok", ""]).is_err());
    }
}
