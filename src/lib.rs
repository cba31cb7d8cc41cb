//! Host-side driver core for SportIdent electronic timing stations.
//!
//! Talks the SI station wire protocol over a serial line: frame codec and
//! CRC, the 128-byte SYSVAL configuration block, card readout, paginated
//! backup-memory reading, and the autosend punch poller. Building a CLI,
//! CSV export, or any other outer surface around this is left to callers.

mod autosend;
mod backup;
mod cards;
mod crc;
mod debug_log;
mod decode;
mod discovery;
mod error;
mod frame;
mod model;
mod proto;
mod readout;
mod session;
mod sysval;
mod transport;

pub use autosend::{AutosendPoller, AutosendPunch};
pub use backup::{read_backup, BackupError, BackupRecord};
pub use cards::{CardFamily, CardRecord, Punch};
pub use debug_log::{DebugSink, Direction, NullSink};
pub use discovery::list_candidate_ports;
pub use error::{Result, SiError};
pub use model::{Model, OperatingMode, ProtoConfig};
pub use readout::{PresentCard, Readout};
pub use session::{OpenOptions, Session};
pub use sysval::{Program, Si6PunchMode, SysVal};
pub use transport::{Baud, SerialTransport, Transport};
