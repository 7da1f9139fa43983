mod caching;
mod cse;
mod mock;
mod quota;
mod rss;

pub use self::caching::CachingNews;
pub use self::cse::CseNewsSource;
pub use self::mock::MockNewsSource;
pub use self::quota::QuotaCounter;
pub use self::rss::RssNewsSource;
