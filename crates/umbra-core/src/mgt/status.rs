//! Operator-facing status report.
//!
//! The layout is a stable fixed-column ASCII table consumed by existing
//! tooling; the header string, column widths and NUL terminator must stay
//! exactly as they are.

use super::PeerMgt;
use std::fmt::Write as _;

const HEADER: &str = "PeerID    NodeID                                                            Address                                       Status  LastPkt   SessAge   Flag";

impl PeerMgt {
    /// Render one header row plus one row per valid slot, NUL-terminated.
    ///
    /// Columns: `PeerID(hex8) NodeID(hex64) Address(hex48) State(hex2)
    /// LastPkt(hex8) SessAge(hex8) RemoteFlags(hex4)`.
    #[must_use]
    pub fn status(&self) -> String {
        let tnow = self.clock.now();
        let mut report = String::with_capacity((self.map.capacity() + 2) * 156);
        report.push_str(HEADER);
        report.push('\n');

        for slot in 0..self.map.capacity() {
            let Some(node_id) = self.map.node_id(slot) else {
                continue;
            };
            let s = &self.slots[slot];
            let _ = write!(report, "{:08x}  ", slot as u32);
            let _ = write!(report, "{}  ", hex::encode(node_id.as_bytes()));
            let _ = write!(report, "{}  ", hex::encode(s.remote_addr.to_bytes()));
            let _ = write!(report, "{:02x}  ", s.state as u8);
            let _ = write!(report, "{:08x}  ", (tnow - s.last_recv) as u32);
            let _ = write!(report, "{:08x}  ", (tnow - s.conn_time) as u32);
            let _ = writeln!(report, "{:04x}", s.remote_flags);
        }
        report.push('\0');
        report
    }
}
