/*!
 * Core Types
 * Common types used across the adjuster
 */

/// Process ID type
pub type Pid = u32;

/// Owning principal (user id) of a process
pub type Uid = u32;

/// Milliseconds on the scheduler clock
pub type Timestamp = u64;

/// Identifier of a dependency edge
pub type ConnectionId = u64;

/// Numeric importance score; lower is more important
pub type Adj = i32;

/// Inline-optimized string for names and reason tags
///
/// Short strings (up to 23 bytes) are stored without heap allocation.
pub type InlineString = smartstring::alias::String;

/// Common result type for adjuster operations
pub type AdjResult<T> = Result<T, super::errors::AdjusterError>;
