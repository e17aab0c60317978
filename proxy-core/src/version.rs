//! Build/version metadata, surfaced by `/health` and the management API's
//! `/admin/config_dump` endpoint.

#[derive(Clone, Debug, serde::Serialize)]
pub struct BuildInfo {
	pub version: &'static str,
	pub rust_version: &'static str,
	pub target: &'static str,
}

impl BuildInfo {
	pub fn new() -> Self {
		BuildInfo {
			version: env!("CARGO_PKG_VERSION"),
			rust_version: "1.85",
			target: std::env::consts::ARCH,
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::new()
	}
}
