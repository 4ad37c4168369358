pub mod guards;
pub mod router;
pub mod trader;

pub use router::SignalRouter;
pub use trader::PaperTrader;
