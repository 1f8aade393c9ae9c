//! Domain records shared by the server, the statistics helpers and the client.

mod config;
mod gasto;
mod grupo;
mod medio_pago;
mod token;
mod user;

pub use config::AppConfig;
pub use gasto::{Gasto, GastoDraft, GastoInput, CATEGORIAS, MONEDAS};
pub use grupo::{
    AcceptInvitation, Grupo, GrupoDraft, GrupoInput, GrupoInvitation, GrupoMembership, GrupoView,
    InvitationInput, MembershipUpdate, Role, GRUPO_CURRENCIES, GRUPO_TYPES,
};
pub use medio_pago::{MedioPago, MedioPagoDraft, MedioPagoInput, TIPOS, TIPOS_TARJETA};
pub use token::{Claims, RefreshInput, TokenPair, TokenType};
pub use user::{LoginInput, RegisterInput, User};

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Keeps an explicit `null` distinguishable from an absent field.
/// Use with `#[serde(default, deserialize_with = "present")]`.
pub(crate) fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
