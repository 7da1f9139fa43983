mod paper;

pub use paper::PaperBroker;
