pub(crate) const DEFAULT_HTTP_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_P2P_LISTEN: &str = "0.0.0.0:6001";
pub(crate) const NODE_ID_BYTES: usize = 16;
