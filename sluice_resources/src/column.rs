//! Column identifier quoting.

/// Quote a column name so that the destination resolves it with its exact case.
///
/// Names that are already upper case are returned unchanged, the destination
/// resolves them case-insensitively. Any other name is wrapped in double quotes.
///
/// Quoting is not idempotent: apply it exactly once per logical column name.
pub fn quote_column(name: &str) -> String {
    if name == name.to_uppercase() {
        return name.to_string();
    }

    format!("\"{name}\"")
}
