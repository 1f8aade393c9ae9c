//! Service layer. Each service is a stateless set of async operations over
//! the SQLite pool.

pub mod database;
pub mod gasto;
pub mod grupo;
pub mod invitation;
pub mod login_attempt;
pub mod medio_pago;
pub mod membership;
pub mod session;
pub mod token;
pub mod user;

pub use database::{ImportReport, LegacyData, LegacyImporter};
pub use gasto::{GastoFilter, GastoService};
pub use grupo::GrupoService;
pub use invitation::InvitationService;
pub use login_attempt::LoginAttemptService;
pub use medio_pago::MedioPagoService;
pub use membership::MembershipService;
pub use session::{ClientInfo, SessionPolicy, SessionService, SessionStats};
pub use token::TokenService;
pub use user::UserService;
