pub mod poison_pill;
pub mod sentinel;
pub mod watchdog;

pub use poison_pill::PoisonPillScanner;
pub use sentinel::Sentinel;
pub use watchdog::Watchdog;
