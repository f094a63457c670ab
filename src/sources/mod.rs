pub mod arxiv;
pub mod rss_feed;
