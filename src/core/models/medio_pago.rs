use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::core::validation::Validator;
use crate::error::AppResult;

pub const TIPOS: &[(&str, &str)] = &[
    ("TC", "Tarjeta de Crédito"),
    ("TD", "Tarjeta de Débito"),
    ("TR", "Transferencia"),
    ("EF", "Efectivo"),
];

pub const TIPOS_TARJETA: &[(&str, &str)] = &[
    ("VISA", "Visa"),
    ("MASTERCARD", "MasterCard"),
    ("MAESTRO", "Maestro"),
    ("AMEX", "American Express"),
    ("OTROS", "Otros"),
];

/// A payment method: card, transfer or cash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedioPago {
    pub id: i64,
    pub user: i64,
    pub ente_emisor: String,
    pub tipo: String,
    #[serde(default)]
    pub tipo_tarjeta: Option<String>,
    #[serde(default)]
    pub extra: String,
}

impl MedioPago {
    pub(crate) fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user: row.try_get("user_id")?,
            ente_emisor: row.try_get("ente_emisor")?,
            tipo: row.try_get("tipo")?,
            tipo_tarjeta: row.try_get("tipo_tarjeta")?,
            extra: row.try_get("extra")?,
        })
    }
}

fn is_card(tipo: &str) -> bool {
    tipo == "TC" || tipo == "TD"
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedioPagoInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ente_emisor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo_tarjeta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MedioPagoDraft {
    pub ente_emisor: String,
    pub tipo: String,
    pub tipo_tarjeta: Option<String>,
    pub extra: String,
}

impl MedioPagoInput {
    pub fn overlay(self, existing: &MedioPago) -> Self {
        Self {
            ente_emisor: self.ente_emisor.or_else(|| Some(existing.ente_emisor.clone())),
            tipo: self.tipo.or_else(|| Some(existing.tipo.clone())),
            tipo_tarjeta: self.tipo_tarjeta.or_else(|| existing.tipo_tarjeta.clone()),
            extra: self.extra.or_else(|| Some(existing.extra.clone())),
        }
    }

    pub fn validate(&self) -> AppResult<MedioPagoDraft> {
        let mut v = Validator::new();
        let ente_emisor = v.text("ente_emisor", self.ente_emisor.as_deref(), true, 100);
        let tipo = v.choice("tipo", self.tipo.as_deref(), TIPOS, None);

        // Card subtype only means something for credit/debit cards.
        let tipo_tarjeta = match tipo.as_deref() {
            Some(t) if is_card(t) => {
                let value = self.tipo_tarjeta.as_deref().map(str::trim).unwrap_or_default();
                if value.is_empty() {
                    v.error("tipo_tarjeta", "Seleccione el tipo de tarjeta");
                    None
                } else {
                    v.choice("tipo_tarjeta", Some(value), TIPOS_TARJETA, None)
                }
            }
            _ => None,
        };
        let extra = v.text("extra", self.extra.as_deref(), false, 64);

        match (ente_emisor, tipo, extra) {
            (Some(ente_emisor), Some(tipo), Some(extra)) if v.is_ok() => Ok(MedioPagoDraft {
                ente_emisor,
                tipo,
                tipo_tarjeta,
                extra,
            }),
            _ => Err(v.into_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn input(tipo: &str, tarjeta: Option<&str>) -> MedioPagoInput {
        MedioPagoInput {
            ente_emisor: Some("Banco Nación".into()),
            tipo: Some(tipo.into()),
            tipo_tarjeta: tarjeta.map(String::from),
            extra: None,
        }
    }

    #[test]
    fn test_card_requires_subtype() {
        match input("TC", None).validate().unwrap_err() {
            AppError::Validation(errors) => assert!(errors.contains_key("tipo_tarjeta")),
            other => panic!("unexpected {:?}", other),
        }
        let draft = input("TD", Some("VISA")).validate().unwrap();
        assert_eq!(draft.tipo_tarjeta.as_deref(), Some("VISA"));
    }

    #[test]
    fn test_non_card_drops_subtype() {
        let draft = input("EF", Some("VISA")).validate().unwrap();
        assert_eq!(draft.tipo_tarjeta, None);
        assert_eq!(draft.extra, "");
    }

    #[test]
    fn test_rejects_unknown_tipo() {
        assert!(input("XX", None).validate().is_err());
    }
}
