//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test data changes (user credentials, stub decoder output, etc.),
//! update only this file.

// ============================================================================
// Test User Credentials
// ============================================================================

/// Primary test user handle
pub const TEST_USER: &str = "testuser";

/// Primary test user password
pub const TEST_PASS: &str = "testpass123";

/// Second test user handle, for ownership and visibility tests
pub const OTHER_USER: &str = "otheruser";

/// Second test user password
pub const OTHER_PASS: &str = "otherpass123";

// ============================================================================
// Stub Decoder Output
// ============================================================================

/// Number of peaks the stub decoder produces
pub const STUB_PEAK_COUNT: usize = 1000;

/// Duration the stub decoder reports (seconds)
pub const STUB_DURATION_SECS: f64 = 10.0;

/// Peaks-per-second rate the stub decoder reports
pub const STUB_SAMPLE_RATE: u32 = 100;

// ============================================================================
// Test Server Configuration
// ============================================================================

/// Maximum upload size accepted by test servers (bytes)
pub const TEST_MAX_FILE_SIZE_BYTES: u64 = 64 * 1024;

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for background work after an upload (milliseconds)
pub const BACKGROUND_WORK_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Test File Sizes (exact, for validation)
// ============================================================================

/// Size of the embedded test audio file (bytes)
pub const TEST_AUDIO_SIZE_BYTES: usize = 8192;
