//! Field validation producing the `{field: [messages]}` map the front end
//! renders next to each form input.

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{AppError, AppResult, FieldErrors};

pub const REQUIRED: &str = "Este campo es requerido.";

#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_error(self) -> AppError {
        AppError::Validation(self.errors)
    }

    pub fn finish(self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }

    /// Trimmed text. Absent optional fields come back as an empty string.
    pub fn text(
        &mut self,
        field: &str,
        value: Option<&str>,
        required: bool,
        max: usize,
    ) -> Option<String> {
        let value = value.map(str::trim).unwrap_or_default();
        if required && value.is_empty() {
            self.error(field, REQUIRED);
            return None;
        }
        if value.chars().count() > max {
            self.error(
                field,
                format!(
                    "Asegúrese de que este campo no tenga más de {} caracteres.",
                    max
                ),
            );
            return None;
        }
        Some(value.to_string())
    }

    /// One of `choices` (matched on the code). Empty input falls back to
    /// `default`, or is a required error when there is none.
    pub fn choice(
        &mut self,
        field: &str,
        value: Option<&str>,
        choices: &[(&str, &str)],
        default: Option<&str>,
    ) -> Option<String> {
        let value = value.map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return match default {
                Some(default) => Some(default.to_string()),
                None => {
                    self.error(field, REQUIRED);
                    None
                }
            };
        }
        if choices.iter().any(|(code, _)| *code == value) {
            Some(value.to_string())
        } else {
            self.error(field, format!("\"{}\" no es una opción válida.", value));
            None
        }
    }

    pub fn number(&mut self, field: &str, value: Option<&Value>) -> Option<f64> {
        match value {
            None | Some(Value::Null) => {
                self.error(field, REQUIRED);
                None
            }
            Some(v) => match value_as_f64(v) {
                Some(n) if n.is_finite() => Some(n),
                _ => {
                    self.error(field, "Se requiere un número válido.");
                    None
                }
            },
        }
    }

    pub fn integer(&mut self, field: &str, value: Option<&Value>) -> Option<i64> {
        match value {
            None | Some(Value::Null) => {
                self.error(field, REQUIRED);
                None
            }
            Some(v) => match value_as_i64(v) {
                Some(n) => Some(n),
                None => {
                    self.error(field, "Introduzca un número entero válido.");
                    None
                }
            },
        }
    }

    /// Nullable foreign key: `null` or `""` clear it.
    pub fn optional_id(&mut self, field: &str, value: Option<&Value>) -> Option<Option<i64>> {
        match value {
            None | Some(Value::Null) => Some(None),
            Some(Value::String(s)) if s.trim().is_empty() => Some(None),
            Some(v) => match value_as_i64(v) {
                Some(id) => Some(Some(id)),
                None => {
                    self.error(field, "Clave primaria inválida.");
                    None
                }
            },
        }
    }

    pub fn date(&mut self, field: &str, value: Option<&str>) -> Option<NaiveDate> {
        match value.map(str::trim) {
            None | Some("") => {
                self.error(field, REQUIRED);
                None
            }
            Some(s) => match crate::core::dates::parse_local_date(s) {
                Some(d) => Some(d),
                None => {
                    self.error(
                        field,
                        "Formato de fecha inválido. Utilice el formato AAAA-MM-DD.",
                    );
                    None
                }
            },
        }
    }

    /// Nullable date: `null` or `""` clear it.
    pub fn optional_date(&mut self, field: &str, value: Option<&Value>) -> Option<Option<NaiveDate>> {
        match value {
            None | Some(Value::Null) => Some(None),
            Some(Value::String(s)) if s.trim().is_empty() => Some(None),
            Some(Value::String(s)) => self.date(field, Some(s.as_str())).map(Some),
            Some(_) => {
                self.error(
                    field,
                    "Formato de fecha inválido. Utilice el formato AAAA-MM-DD.",
                );
                None
            }
        }
    }
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_required_and_max() {
        let mut v = Validator::new();
        assert_eq!(v.text("vendedor", Some("  Coto "), true, 128), Some("Coto".into()));
        assert_eq!(v.text("vendedor", Some("   "), true, 128), None);
        assert_eq!(v.text("extra", None, false, 64), Some(String::new()));
        assert_eq!(v.text("extra", Some("x".repeat(65).as_str()), false, 64), None);
        let err = v.finish().unwrap_err();
        match err {
            AppError::Validation(errors) => {
                assert_eq!(errors["vendedor"], vec![REQUIRED.to_string()]);
                assert!(errors.contains_key("extra"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_choice_default_and_invalid() {
        let choices = [("ARS", "Peso"), ("USD", "Dólar")];
        let mut v = Validator::new();
        assert_eq!(v.choice("moneda", None, &choices, Some("ARS")), Some("ARS".into()));
        assert_eq!(v.choice("moneda", Some("USD"), &choices, None), Some("USD".into()));
        assert_eq!(v.choice("moneda", Some("EUR"), &choices, None), None);
        assert!(v.has_error("moneda"));
    }

    #[test]
    fn test_numbers_accept_form_strings() {
        let mut v = Validator::new();
        assert_eq!(v.number("monto", Some(&json!("1500.50"))), Some(1500.5));
        assert_eq!(v.integer("pagos_totales", Some(&json!("3"))), Some(3));
        assert_eq!(v.integer("pagos_totales", Some(&json!(3.0))), Some(3));
        assert_eq!(v.integer("pagos_totales", Some(&json!(2.5))), None);
        assert_eq!(v.optional_id("grupo", Some(&json!(""))), Some(None));
        assert_eq!(v.optional_id("grupo", Some(&json!("7"))), Some(Some(7)));
        assert!(v.has_error("pagos_totales"));
        assert!(!v.has_error("monto"));
    }

    #[test]
    fn test_dates() {
        let mut v = Validator::new();
        assert!(v.date("fecha_gasto", Some("2026-10-17")).is_some());
        assert!(v.date("fecha_gasto", Some("17/10/2026")).is_none());
        assert_eq!(v.optional_date("end_date", Some(&Value::Null)), Some(None));
        assert!(v.has_error("fecha_gasto"));
    }
}
