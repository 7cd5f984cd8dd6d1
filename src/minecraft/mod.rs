//! Game server and player directory integrations
pub mod entitlement;
pub mod profiles;
pub mod rcon;

pub use entitlement::{normalize_rank_name, EntitlementGateway, RconEntitlements};
pub use profiles::{MojangProfiles, ProfileDirectory};
