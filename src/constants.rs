/// Innertube browse endpoint serving the trending feed.
pub const BROWSE_URL: &str = "https://www.youtube.com/youtubei/v1/browse";
pub const TRENDING_BROWSE_ID: &str = "FEtrending";
pub const TRENDING_ORIGINAL_URL: &str = "https://www.youtube.com/feed/trending";

/// WEB client identity sent with every innertube request.
pub const INNERTUBE_CLIENT_NAME: &str = "WEB";
pub const INNERTUBE_CLIENT_VERSION: &str = "2.20231115.01.01";

/// Data API v3 endpoints used for enrichment.
pub const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";
pub const CHANNELS_URL: &str = "https://www.googleapis.com/youtube/v3/channels";

/// Documented per-call identifier ceiling for videos.list / channels.list.
pub const MAX_IDS_PER_CALL: usize = 50;

pub const CHANNEL_URL_PREFIX: &str = "https://www.youtube.com/channel/";

/// Browse params selecting a trending category tab. `Now` takes no param and
/// `Recently Trending` is a shelf inside the `Now` tab, not a tab of its own.
pub const MUSIC_PARAMS: &str = "4gINGgt5dG1hX2NoYXJ0cw%3D%3D";
pub const GAMING_PARAMS: &str = "4gIcGhpnYW1pbmdfY29ycHVzX21vc3RfcG9wdWxhcg%3D%3D";
pub const MOVIES_PARAMS: &str = "4gIKGgh0cmFpbGVycw%3D%3D";
