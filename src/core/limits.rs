/*!
 * Score Constants and Limits
 *
 * Centralized location for the adj lattice and the fixed bounds of the
 * evaluation algorithm.
 *
 * ## Layout
 * - Adj values are grouped from most to least important
 * - Cached tier bounds sit at the end of the range
 * - Algorithm bounds are marked with [ALGO]
 */

use super::types::Adj;

// =============================================================================
// ADJ LATTICE
// =============================================================================

/// Native daemons, never managed by the adjuster
pub const NATIVE_ADJ: Adj = -1000;

/// The system server itself
pub const SYSTEM_ADJ: Adj = -900;

/// Persistent processes that must never be killed
pub const PERSISTENT_PROC_ADJ: Adj = -800;

/// Services hosted for a persistent client
pub const PERSISTENT_SERVICE_ADJ: Adj = -700;

/// The foreground app and anything executing on its behalf
pub const FOREGROUND_APP_ADJ: Adj = 0;

/// Recently foreground, now running a foreground service
pub const PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ: Adj = 50;

/// Hosts a visible activity
pub const VISIBLE_APP_ADJ: Adj = 100;

/// User-perceptible work (music playback, foreground service)
pub const PERCEPTIBLE_APP_ADJ: Adj = 200;

/// Perceptible but weaker (short service, stopped perceptible task)
pub const PERCEPTIBLE_MEDIUM_APP_ADJ: Adj = 225;

/// Perceptible only through a not-perceptible binding
pub const PERCEPTIBLE_LOW_APP_ADJ: Adj = 250;

/// Current backup target
pub const BACKUP_APP_ADJ: Adj = 300;

/// The heavy-weight app
pub const HEAVY_WEIGHT_APP_ADJ: Adj = 400;

/// Processes running started services
pub const SERVICE_ADJ: Adj = 500;

/// The home/launcher app
pub const HOME_APP_ADJ: Adj = 600;

/// The most recently backgrounded app
pub const PREVIOUS_APP_ADJ: Adj = 700;

/// Upper bound of the previous-app ladder
pub const PREVIOUS_APP_MAX_ADJ: Adj = 799;

/// Older services demoted out of the A list
pub const SERVICE_B_ADJ: Adj = 800;

/// First cached bucket
pub const CACHED_APP_MIN_ADJ: Adj = 900;

/// Last cached bucket
pub const CACHED_APP_MAX_ADJ: Adj = 999;

/// Not yet assigned; must be resolved by the LRU ranker
pub const UNKNOWN_ADJ: Adj = 1001;

/// Clients weaker than this do not keep a UI-showing service warm
pub const CACHING_UI_SERVICE_CLIENT_ADJ_THRESHOLD: Adj = PERCEPTIBLE_APP_ADJ;

// =============================================================================
// ALGORITHM BOUNDS
// =============================================================================

/// Rounds of cycle re-evaluation before giving up
/// [ALGO] The lattice is finite, so this only guards against rule bugs
pub const MAX_CYCLE_ROUNDS: u32 = 10;

/// First ui target offset inside a tiered cached bucket
/// [ALGO]
pub const TIERED_UI_TARGET_START: Adj = 10;

/// Offset of decayed cached processes inside the tiered layout
/// [ALGO]
pub const TIERED_DECAYED_OFFSET: Adj = 40;

/// Capacity of the recent event history
pub const EVENT_HISTORY_CAPACITY: usize = 256;

/// Initial free swap fraction before any memory sample
pub const INITIAL_FREE_SWAP: f64 = 1.0;
