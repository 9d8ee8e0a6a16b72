pub mod news_feed;
pub mod plantuml;
