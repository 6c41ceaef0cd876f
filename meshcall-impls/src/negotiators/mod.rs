mod rtc_negotiator;

pub use rtc_negotiator::*;
