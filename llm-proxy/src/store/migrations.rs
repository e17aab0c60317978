//! Forward-only schema versioning for the store backends.
//!
//! Each `Migration` bumps the on-disk schema by one version; `rollback`
//! exists purely to undo the most recent upgrade during a failed deploy,
//! it is never applied automatically. A networked SQL backend would run
//! these as real `ALTER TABLE` statements; the embedded backend treats
//! them as snapshot transforms applied to the deserialized JSON value
//! before it's handed to `serde` for the current row types.

use serde_json::Value;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

pub struct Migration {
	pub version: u32,
	pub description: &'static str,
	pub up: fn(Value) -> anyhow::Result<Value>,
	pub down: fn(Value) -> anyhow::Result<Value>,
}

/// All migrations in ascending version order. `version 1` is the baseline
/// schema shipped with this crate, so its `up`/`down` are identities.
pub fn all() -> Vec<Migration> {
	vec![Migration {
		version: 1,
		description: "baseline schema: projects, tokens",
		up: |v| Ok(v),
		down: |v| Ok(v),
	}]
}

/// Applies every migration with `version > from_version`, in order.
pub fn migrate_up(mut snapshot: Value, from_version: u32) -> anyhow::Result<(Value, u32)> {
	let mut version = from_version;
	for migration in all().into_iter().filter(|m| m.version > from_version) {
		snapshot = (migration.up)(snapshot)?;
		version = migration.version;
	}
	Ok((snapshot, version))
}

/// Reverts migrations down to (and excluding) `to_version`, in reverse
/// order. Used to recover from a bad upgrade during deploy.
pub fn migrate_down(mut snapshot: Value, from_version: u32, to_version: u32) -> anyhow::Result<(Value, u32)> {
	let mut migrations = all();
	migrations.retain(|m| m.version <= from_version && m.version > to_version);
	migrations.sort_by(|a, b| b.version.cmp(&a.version));
	for migration in migrations {
		snapshot = (migration.down)(snapshot)?;
	}
	Ok((snapshot, to_version))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn baseline_migration_is_identity() {
		let (v, version) = migrate_up(Value::Null, 0).unwrap();
		assert_eq!(version, CURRENT_SCHEMA_VERSION);
		assert_eq!(v, Value::Null);
	}
}
