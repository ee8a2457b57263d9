use crate::logging;

/// Install the default subscriber for a test binary.
///
/// Safe to call from every test; only the first call has an effect.
pub fn setup_test() {
    logging::Config::default().init();
}
