// ── Domain model ──
//
// Canonical representation of the installation tree, commands and
// observed zone state. Everything downstream of `convert.rs` works with
// these types only.

pub mod command;
pub mod installation;
pub mod state;
pub mod zone_id;

pub use command::{CommandKind, CommandRecord, CommandStatus, CommandValue, NO_OP_EPSILON};
pub use installation::{Channel, Group, HeatCoolMode, Installation, Setpoints, Zone};
pub use state::ZoneState;
pub use zone_id::{InvalidZoneId, ZoneId};
