//! Per-client segment cursor leases.
//!
//! Every log client - the writer, each tailing reader - works through a
//! leased cursor: one open [`SegmentFile`] handle plus the position it last
//! served. The table hands a cursor out (a *loan*), the client does its
//! reads or writes on the handle without any shared locking, and checks the
//! cursor back in.
//!
//! Cursors are keyed by an explicit [`ClientId`] issued by the table, so a
//! cursor can migrate between OS threads with its owner. Idle cursors are
//! reclaimed to bound the number of open file handles; reclamation is
//! invisible to the client, which simply sees a miss and reopens via the
//! index.

use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentFile;
use crate::types::{ClientId, Seqno};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// One leased cursor: a private segment handle and its log position.
#[derive(Debug)]
pub struct LogConnection {
    /// Open handle on the segment the cursor is positioned in.
    pub segment: SegmentFile,
    /// Last sequence number served through this cursor.
    pub last_seqno: Seqno,
}

/// A table slot: either a parked cursor or the marker of one that is
/// currently out with its client.
#[derive(Debug)]
enum Slot {
    Ready {
        conn: LogConnection,
        last_access: Instant,
    },
    Loaned,
}

/// Result of asking the table for a cursor.
#[derive(Debug)]
pub enum Checkout {
    /// The client's parked cursor, now on loan.
    Hit(LogConnection),
    /// No usable cursor; the caller opens a segment via the index and
    /// installs a fresh one.
    Miss,
}

/// Tracks one cursor per client, guarded by one coarse lock.
///
/// The lock covers only checkout/checkin bookkeeping; the actual I/O happens
/// on the loaned handle outside the lock.
#[derive(Debug)]
pub struct ConnectionTable {
    /// `None` once the table is released; all access then fails fast.
    slots: Mutex<Option<HashMap<ClientId, Slot>>>,
    /// Idle time after which a parked cursor is reclaimed.
    idle_timeout: Duration,
    /// Source of client IDs.
    next_client: AtomicU64,
}

impl ConnectionTable {
    /// Creates an empty table with the given idle reclamation timeout.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(Some(HashMap::new())),
            idle_timeout,
            next_client: AtomicU64::new(0),
        }
    }

    /// Issues a new client ID.
    ///
    /// Cheap: no slot is created until the client's first cursor is
    /// installed.
    pub fn connect(&self) -> ClientId {
        ClientId::new(self.next_client.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Asks for the client's cursor, positioned to read toward `next_seqno`.
    ///
    /// - No cursor parked for this client: [`Checkout::Miss`].
    /// - Parked cursor at or before `next_seqno`: loaned out as
    ///   [`Checkout::Hit`].
    /// - Parked cursor past `next_seqno` (the client wants to rewind): the
    ///   cursor is invalidated and dropped, and the caller reopens via the
    ///   index ([`Checkout::Miss`]).
    ///
    /// Before any of that, parked cursors of *other* clients idle past the
    /// timeout are reclaimed.
    ///
    /// # Errors
    ///
    /// Asking for a cursor that is already on loan is a misuse error;
    /// a released table fails with [`CoreError::LogClosed`].
    pub fn checkout(&self, client: ClientId, next_seqno: Seqno) -> CoreResult<Checkout> {
        let mut guard = self.slots.lock();
        let slots = guard.as_mut().ok_or(CoreError::LogClosed)?;

        // Reclaim idle cursors first so open handles stay bounded even when
        // some readers go quiet.
        let idle_timeout = self.idle_timeout;
        slots.retain(|id, slot| match slot {
            Slot::Loaned => true,
            Slot::Ready { last_access, .. } => {
                let keep = *id == client || last_access.elapsed() <= idle_timeout;
                if !keep {
                    tracing::debug!(client = %id, "reclaiming idle cursor");
                }
                keep
            }
        });

        match slots.remove(&client) {
            None => Ok(Checkout::Miss),
            Some(Slot::Loaned) => {
                slots.insert(client, Slot::Loaned);
                Err(CoreError::misuse(format!(
                    "cursor for {client} is already on loan"
                )))
            }
            Some(Slot::Ready { conn, .. }) => {
                if conn.last_seqno > next_seqno {
                    // Rewind: the cursor is ahead of where the client wants
                    // to read. Drop it; the caller reopens via the index.
                    tracing::debug!(
                        client = %client,
                        at = %conn.last_seqno,
                        want = %next_seqno,
                        "invalidating cursor for rewind"
                    );
                    Ok(Checkout::Miss)
                } else {
                    slots.insert(client, Slot::Loaned);
                    Ok(Checkout::Hit(conn))
                }
            }
        }
    }

    /// Records a loan for a freshly opened cursor.
    ///
    /// Any parked cursor the client still had is dropped first.
    ///
    /// # Errors
    ///
    /// Installing over an active loan is a misuse error; a released table
    /// fails with [`CoreError::LogClosed`].
    pub fn install(&self, client: ClientId) -> CoreResult<()> {
        let mut guard = self.slots.lock();
        let slots = guard.as_mut().ok_or(CoreError::LogClosed)?;

        if matches!(slots.get(&client), Some(Slot::Loaned)) {
            return Err(CoreError::misuse(format!(
                "cursor for {client} is already on loan"
            )));
        }

        slots.insert(client, Slot::Loaned);
        Ok(())
    }

    /// Returns a loaned cursor to the table.
    ///
    /// If the client's slot was released while the cursor was out (or the
    /// table itself was released), the cursor is simply dropped, closing its
    /// handle.
    pub fn checkin(&self, client: ClientId, conn: LogConnection) {
        let mut guard = self.slots.lock();
        let Some(slots) = guard.as_mut() else {
            return; // table released; drop the handle
        };

        if matches!(slots.get(&client), Some(Slot::Loaned)) {
            slots.insert(
                client,
                Slot::Ready {
                    conn,
                    last_access: Instant::now(),
                },
            );
        }
    }

    /// Drops one client's cursor, closing its handle if parked.
    pub fn release_client(&self, client: ClientId) {
        if let Some(slots) = self.slots.lock().as_mut() {
            slots.remove(&client);
        }
    }

    /// Drops every parked cursor, closing its handle; cursors currently on
    /// loan are left untouched and keep working on their open handles.
    pub fn clear_parked(&self) {
        if let Some(slots) = self.slots.lock().as_mut() {
            slots.retain(|_, slot| matches!(slot, Slot::Loaned));
        }
    }

    /// Drains all cursors and marks the table closed.
    ///
    /// Subsequent checkouts fail fast with [`CoreError::LogClosed`].
    pub fn release(&self) {
        *self.slots.lock() = None;
    }

    /// Whether the table has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slots.lock().is_none()
    }

    /// Number of tracked cursors (parked or loaned).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().as_ref().map_or(0, HashMap::len)
    }

    /// Whether no cursors are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
