use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::present;
use crate::core::dates::parse_local_date;
use crate::core::validation::Validator;
use crate::error::{AppError, AppResult};

pub const MONEDAS: &[(&str, &str)] = &[
    ("ARS", "Peso Argentino"),
    ("USD", "Dólar Americano"),
    ("RS", "Real Brasileño"),
    ("CLP", "Peso Chileno"),
    ("NA", "Otros"),
];

pub const CATEGORIAS: &[(&str, &str)] = &[
    ("finanzas", "Finanzas"),
    ("salud", "Salud"),
    ("transporte", "Transporte"),
    ("comida", "Comida"),
    ("indumentaria", "Indumentaria"),
    ("tecnologia", "Tecnología"),
    ("inversiones", "Inversiones"),
    ("otros", "Otros"),
];

/// An expense, possibly paid in `pagos_totales` installments (cuotas).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gasto {
    pub id: i64,
    pub user: i64,
    pub monto: f64,
    pub moneda: String,
    pub pagos_realizados: i64,
    pub pagos_totales: i64,
    pub medio_pago: i64,
    pub vendedor: String,
    pub categoria: String,
    #[serde(default)]
    pub comentarios: String,
    pub fecha_gasto: NaiveDate,
    #[serde(default)]
    pub grupo: Option<i64>,
}

impl Gasto {
    pub fn is_paid(&self) -> bool {
        self.pagos_realizados >= self.pagos_totales
    }

    /// Amount still owed: the per-installment amount times the cuotas left.
    pub fn pending_amount(&self) -> f64 {
        if self.pagos_totales <= 0 || self.is_paid() {
            return 0.0;
        }
        let pendientes = (self.pagos_totales - self.pagos_realizados.max(0)) as f64;
        self.monto / self.pagos_totales as f64 * pendientes
    }

    pub(crate) fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let fecha: String = row.try_get("fecha_gasto")?;
        let fecha_gasto = parse_local_date(&fecha)
            .ok_or_else(|| AppError::Unknown(format!("fecha_gasto corrupta: {}", fecha)))?;
        Ok(Self {
            id: row.try_get("id")?,
            user: row.try_get("user_id")?,
            monto: row.try_get("monto")?,
            moneda: row.try_get("moneda")?,
            pagos_realizados: row.try_get("pagos_realizados")?,
            pagos_totales: row.try_get("pagos_totales")?,
            medio_pago: row.try_get("medio_pago_id")?,
            vendedor: row.try_get("vendedor")?,
            categoria: row.try_get("categoria")?,
            comentarios: row.try_get("comentarios")?,
            fecha_gasto,
            grupo: row.try_get("grupo_id")?,
        })
    }
}

/// Request body for create/update. Numeric fields stay raw JSON so that form
/// strings like `"1500.50"` are accepted and bad input becomes a field error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GastoInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monto: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moneda: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagos_realizados: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagos_totales: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medio_pago: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendedor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categoria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comentarios: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_gasto: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub grupo: Option<Value>,
}

/// A validated expense ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct GastoDraft {
    pub monto: f64,
    pub moneda: String,
    pub pagos_realizados: i64,
    pub pagos_totales: i64,
    pub medio_pago: i64,
    pub vendedor: String,
    pub categoria: String,
    pub comentarios: String,
    pub fecha_gasto: NaiveDate,
    pub grupo: Option<i64>,
}

impl GastoInput {
    /// Fills every field the request left out with the stored value (PATCH).
    pub fn overlay(self, existing: &Gasto) -> Self {
        Self {
            monto: self.monto.or_else(|| Some(Value::from(existing.monto))),
            moneda: self.moneda.or_else(|| Some(existing.moneda.clone())),
            pagos_realizados: self
                .pagos_realizados
                .or_else(|| Some(Value::from(existing.pagos_realizados))),
            pagos_totales: self
                .pagos_totales
                .or_else(|| Some(Value::from(existing.pagos_totales))),
            medio_pago: self
                .medio_pago
                .or_else(|| Some(Value::from(existing.medio_pago))),
            vendedor: self.vendedor.or_else(|| Some(existing.vendedor.clone())),
            categoria: self.categoria.or_else(|| Some(existing.categoria.clone())),
            comentarios: self
                .comentarios
                .or_else(|| Some(existing.comentarios.clone())),
            fecha_gasto: self
                .fecha_gasto
                .or_else(|| Some(existing.fecha_gasto.format("%Y-%m-%d").to_string())),
            grupo: self
                .grupo
                .or_else(|| Some(existing.grupo.map(Value::from).unwrap_or(Value::Null))),
        }
    }

    pub fn validate(&self) -> AppResult<GastoDraft> {
        let mut v = Validator::new();

        let monto = v.number("monto", self.monto.as_ref());
        if matches!(monto, Some(m) if m <= 0.0) {
            v.error("monto", "Ingrese un monto válido");
        }
        let moneda = v.choice("moneda", self.moneda.as_deref(), MONEDAS, Some("ARS"));
        let pagos_realizados = v.integer("pagos_realizados", self.pagos_realizados.as_ref());
        if matches!(pagos_realizados, Some(p) if p < 0) {
            v.error("pagos_realizados", "Ingrese un número válido");
        }
        let pagos_totales = v.integer("pagos_totales", self.pagos_totales.as_ref());
        if matches!(pagos_totales, Some(p) if p < 1) {
            v.error("pagos_totales", "Debe ser al menos 1");
        }
        if let (Some(realizados), Some(totales)) = (pagos_realizados, pagos_totales) {
            if realizados > totales && !v.has_error("pagos_totales") {
                v.error(
                    "pagos_realizados",
                    "No puede superar la cantidad total de pagos",
                );
            }
        }
        let medio_pago = match self.medio_pago.as_ref() {
            None | Some(Value::Null) => {
                v.error("medio_pago", "Seleccione un medio de pago");
                None
            }
            Some(_) => v.optional_id("medio_pago", self.medio_pago.as_ref()).flatten(),
        };
        let vendedor = v.text("vendedor", self.vendedor.as_deref(), true, 128);
        let categoria = v.choice("categoria", self.categoria.as_deref(), CATEGORIAS, Some("otros"));
        let comentarios = v.text("comentarios", self.comentarios.as_deref(), false, 256);
        let fecha_gasto = v.date("fecha_gasto", self.fecha_gasto.as_deref());
        let grupo = v.optional_id("grupo", self.grupo.as_ref());

        if medio_pago.is_none() && !v.has_error("medio_pago") {
            v.error("medio_pago", "Seleccione un medio de pago");
        }

        match (
            monto,
            moneda,
            pagos_realizados,
            pagos_totales,
            medio_pago,
            vendedor,
            categoria,
            comentarios,
            (fecha_gasto, grupo),
        ) {
            (
                Some(monto),
                Some(moneda),
                Some(pagos_realizados),
                Some(pagos_totales),
                Some(medio_pago),
                Some(vendedor),
                Some(categoria),
                Some(comentarios),
                (Some(fecha_gasto), Some(grupo)),
            ) if v.is_ok() => Ok(GastoDraft {
                monto,
                moneda,
                pagos_realizados,
                pagos_totales,
                medio_pago,
                vendedor,
                categoria,
                comentarios,
                fecha_gasto,
                grupo,
            }),
            _ => Err(v.into_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gasto(monto: f64, realizados: i64, totales: i64) -> Gasto {
        Gasto {
            id: 1,
            user: 1,
            monto,
            moneda: "ARS".into(),
            pagos_realizados: realizados,
            pagos_totales: totales,
            medio_pago: 1,
            vendedor: "Frávega".into(),
            categoria: "tecnologia".into(),
            comentarios: String::new(),
            fecha_gasto: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            grupo: None,
        }
    }

    #[test]
    fn test_pending_amount_per_installment() {
        let g = gasto(1200.0, 4, 12);
        assert!((g.pending_amount() - 800.0).abs() < 1e-9);
        assert!(!g.is_paid());
        assert_eq!(gasto(1200.0, 12, 12).pending_amount(), 0.0);
        assert!(gasto(1200.0, 12, 12).is_paid());
    }

    #[test]
    fn test_validate_defaults() {
        let input: GastoInput = serde_json::from_value(json!({
            "monto": "250.5",
            "pagos_realizados": 0,
            "pagos_totales": "3",
            "medio_pago": "2",
            "vendedor": " Coto ",
            "fecha_gasto": "2026-10-17"
        }))
        .unwrap();
        let draft = input.validate().unwrap();
        assert_eq!(draft.moneda, "ARS");
        assert_eq!(draft.categoria, "otros");
        assert_eq!(draft.vendedor, "Coto");
        assert_eq!(draft.medio_pago, 2);
        assert_eq!(draft.grupo, None);
    }

    #[test]
    fn test_validate_collects_field_errors() {
        let input: GastoInput = serde_json::from_value(json!({
            "monto": 0,
            "moneda": "EUR",
            "pagos_realizados": 5,
            "pagos_totales": 3,
            "vendedor": "",
            "fecha_gasto": "ayer"
        }))
        .unwrap();
        match input.validate().unwrap_err() {
            AppError::Validation(errors) => {
                for field in [
                    "monto",
                    "moneda",
                    "pagos_realizados",
                    "medio_pago",
                    "vendedor",
                    "fecha_gasto",
                ] {
                    assert!(errors.contains_key(field), "missing {}", field);
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_overlay_keeps_unsent_fields_and_explicit_null() {
        let mut existing = gasto(900.0, 1, 3);
        existing.grupo = Some(4);
        let patch: GastoInput =
            serde_json::from_value(json!({"pagos_realizados": 2, "grupo": null})).unwrap();
        let draft = patch.overlay(&existing).validate().unwrap();
        assert_eq!(draft.pagos_realizados, 2);
        assert_eq!(draft.monto, 900.0);
        assert_eq!(draft.grupo, None);

        let untouched: GastoInput = serde_json::from_value(json!({})).unwrap();
        assert_eq!(untouched.overlay(&existing).validate().unwrap().grupo, Some(4));
    }
}
