use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::present;
use crate::core::dates::{from_timestamp, parse_local_date};
use crate::core::validation::Validator;
use crate::error::AppResult;

pub const GRUPO_TYPES: &[(&str, &str)] = &[
    ("trip", "Viaje"),
    ("grupo", "Grupo"),
    ("event", "Evento"),
    ("shared", "Gastos Compartidos"),
];

pub const GRUPO_CURRENCIES: &[(&str, &str)] = &[
    ("ARS", "Peso Argentino"),
    ("USD", "Dólar Americano"),
    ("EUR", "Euro"),
    ("BRL", "Real Brasileño"),
    ("CLP", "Peso Chileno"),
];

/// A shared expense group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grupo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub grupo_type: String,
    pub default_currency: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub allow_new_members: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grupo {
    pub(crate) fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let start: Option<String> = row.try_get("start_date")?;
        let end: Option<String> = row.try_get("end_date")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            grupo_type: row.try_get("grupo_type")?,
            default_currency: row.try_get("default_currency")?,
            start_date: start.as_deref().and_then(parse_local_date),
            end_date: end.as_deref().and_then(parse_local_date),
            is_active: row.try_get("is_active")?,
            allow_new_members: row.try_get("allow_new_members")?,
            created_by: row.try_get("created_by")?,
            created_at: from_timestamp(row.try_get("created_at")?),
            updated_at: from_timestamp(row.try_get("updated_at")?),
        })
    }
}

/// A grupo as seen by one of its members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrupoView {
    #[serde(flatten)]
    pub grupo: Grupo,
    pub member_count: i64,
    pub total_expenses: f64,
    #[serde(default)]
    pub my_role: Option<Role>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrupoInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grupo_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_currency: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_new_members: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrupoDraft {
    pub name: String,
    pub description: String,
    pub grupo_type: String,
    pub default_currency: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub allow_new_members: bool,
}

fn date_value(date: Option<NaiveDate>) -> Value {
    date.map(|d| Value::from(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

impl GrupoInput {
    pub fn overlay(self, existing: &Grupo) -> Self {
        Self {
            name: self.name.or_else(|| Some(existing.name.clone())),
            description: self
                .description
                .or_else(|| Some(existing.description.clone())),
            grupo_type: self.grupo_type.or_else(|| Some(existing.grupo_type.clone())),
            default_currency: self
                .default_currency
                .or_else(|| Some(existing.default_currency.clone())),
            start_date: self
                .start_date
                .or_else(|| Some(date_value(existing.start_date))),
            end_date: self.end_date.or_else(|| Some(date_value(existing.end_date))),
            is_active: self.is_active.or(Some(existing.is_active)),
            allow_new_members: self.allow_new_members.or(Some(existing.allow_new_members)),
        }
    }

    pub fn validate(&self) -> AppResult<GrupoDraft> {
        let mut v = Validator::new();
        let name = v.text("name", self.name.as_deref(), true, 200);
        let description = v.text("description", self.description.as_deref(), false, 500);
        let grupo_type = v.choice("grupo_type", self.grupo_type.as_deref(), GRUPO_TYPES, Some("shared"));
        let default_currency = v.choice(
            "default_currency",
            self.default_currency.as_deref(),
            GRUPO_CURRENCIES,
            Some("ARS"),
        );
        let start_date = v.optional_date("start_date", self.start_date.as_ref());
        let end_date = v.optional_date("end_date", self.end_date.as_ref());
        if let (Some(Some(start)), Some(Some(end))) = (start_date, end_date) {
            if start > end {
                v.error(
                    "end_date",
                    "La fecha de fin debe ser posterior a la fecha de inicio",
                );
            }
        }

        match (name, description, grupo_type, default_currency, start_date, end_date) {
            (
                Some(name),
                Some(description),
                Some(grupo_type),
                Some(default_currency),
                Some(start_date),
                Some(end_date),
            ) if v.is_ok() => Ok(GrupoDraft {
                name,
                description,
                grupo_type,
                default_currency,
                start_date,
                end_date,
                is_active: self.is_active.unwrap_or(true),
                allow_new_members: self.allow_new_members.unwrap_or(true),
            }),
            _ => Err(v.into_error()),
        }
    }
}

/// Membership roles, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    /// Owners and admins manage members, invitations and grupo settings.
    pub fn can_manage(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }

    /// Viewers are read-only.
    pub fn can_write(&self) -> bool {
        !matches!(self, Role::Viewer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrupoMembership {
    pub id: i64,
    pub grupo: i64,
    pub user: i64,
    pub username: String,
    pub role: Role,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
}

impl GrupoMembership {
    /// Expects the `users.username` column joined in.
    pub(crate) fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            grupo: row.try_get("grupo_id")?,
            user: row.try_get("user_id")?,
            username: row.try_get("username")?,
            role: Role::parse(&role).unwrap_or(Role::Viewer),
            is_active: row.try_get("is_active")?,
            joined_at: from_timestamp(row.try_get("joined_at")?),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MembershipUpdate {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrupoInvitation {
    pub id: i64,
    pub grupo: i64,
    pub email: String,
    pub invited_by: i64,
    pub invitation_token: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub is_expired: bool,
}

impl GrupoInvitation {
    pub fn is_pending(&self) -> bool {
        !self.is_used && !self.is_expired
    }

    pub(crate) fn from_row(row: &SqliteRow, now: DateTime<Utc>) -> AppResult<Self> {
        let expires_at = from_timestamp(row.try_get("expires_at")?);
        Ok(Self {
            id: row.try_get("id")?,
            grupo: row.try_get("grupo_id")?,
            email: row.try_get("email")?,
            invited_by: row.try_get("invited_by")?,
            invitation_token: row.try_get("invitation_token")?,
            expires_at,
            is_used: row.try_get("is_used")?,
            created_at: from_timestamp(row.try_get("created_at")?),
            is_expired: expires_at <= now,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitationInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grupo: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// RFC 3339, as produced by `Date.toISOString()`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptInvitation {
    pub token: String,
}
