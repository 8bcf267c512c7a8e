/**
 * Every room gets its own namespace of keys, nothing is shared across rooms
 */
pub const CREATE_ROOM_STORAGE: &str = "
CREATE TABLE IF NOT EXISTS room_storage (
    room TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (room, key)
)";

pub const SELECT_VALUE: &str = "SELECT value FROM room_storage WHERE room = ? AND key = ?";

pub const UPSERT_VALUE: &str = "
INSERT INTO room_storage (room, key, value) VALUES (?, ?, ?)
ON CONFLICT (room, key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP";
