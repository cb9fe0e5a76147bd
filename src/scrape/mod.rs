//! Metadata extraction from YouTube HTML pages.

pub mod channel;
pub mod video;

pub use channel::{ChannelInfo, parse_channel_page, scrape_channel};
pub use video::{VideoMetadata, parse_video_page, scrape_video};
