/// Collector scheduling runtime
///
/// This module groups all logic responsible for:
/// - Describing when collectors run (cadence tables)
/// - Deciding when a firing is due (dispatcher tick loop)
/// - Launching jobs without waiting for them (detached executor)
///
/// The runtime acts as the orchestration layer between:
/// - Discovered collectors (`plugins`)
/// - Their detached job bodies
///
/// Design notes:
/// - Source-specific logic MUST NOT live here
/// - This module should remain thin and orchestration-focused
///
pub mod cadence;
pub mod clock;
pub mod executor;
pub mod runner;
