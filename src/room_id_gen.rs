use crate::errors::SignalingError;
use crate::id_types::RoomId;
use dashmap::DashSet;
use rand::Rng;
use tracing::debug;

/// Total size of the 6-digit room-id space (`"000000"`..=`"999999"`).
const ID_SPACE: u32 = 1_000_000;

/// Allocates unique 6-digit numeric room ids by rejection sampling against
/// the set of currently issued ids.
///
/// Lifecycle-scoped: owned by the `RoomManager`, not a process-wide
/// singleton. Ids are handed back via [`retire`](Self::retire) when a room
/// closes, so a long-running process does not leak the space.
pub struct RoomIdGenerator {
    issued: DashSet<String>,
    space: u32,
}

impl RoomIdGenerator {
    pub fn new() -> Self {
        Self::with_space(ID_SPACE)
    }

    /// Reduced-space constructor used by tests to exercise exhaustion
    /// without issuing a million ids.
    #[cfg(test)]
    pub(crate) fn with_capacity_for_test(space: u32) -> Self {
        Self::with_space(space)
    }

    fn with_space(space: u32) -> Self {
        RoomIdGenerator {
            issued: DashSet::new(),
            space,
        }
    }

    /// Returns a previously unissued id, drawn uniformly at random.
    /// Fails with `CapacityExhausted` once the whole space is issued.
    pub fn generate(&self) -> Result<RoomId, SignalingError> {
        let mut rng = rand::thread_rng();
        loop {
            if self.issued.len() as u32 >= self.space {
                return Err(SignalingError::CapacityExhausted);
            }

            let candidate = format!("{:06}", rng.gen_range(0..self.space));
            // DashSet::insert is the atomic check-and-insert: false means a
            // concurrent caller (or an earlier round) already owns this id.
            if self.issued.insert(candidate.clone()) {
                debug!(room_id = %candidate, issued = self.issued.len(), "issued room id");
                return Ok(RoomId::from(candidate));
            }
        }
    }

    /// Frees an id so it can be issued again. Called when a room closes.
    pub fn retire(&self, room_id: &RoomId) {
        if self.issued.remove(room_id.as_ref()).is_none() {
            debug!(room_id = %room_id, "retire called for an id not currently issued");
        }
    }

    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }
}

impl Default for RoomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
