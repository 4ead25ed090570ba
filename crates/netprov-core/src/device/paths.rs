//! RouterOS collection paths

pub const ARP: &str = "/ip/arp";
pub const PPP_SECRET: &str = "/ppp/secret";
pub const PPP_PROFILE: &str = "/ppp/profile";
pub const PPPOE_SERVER: &str = "/interface/pppoe-server/server";
pub const IP_POOL: &str = "/ip/pool";
pub const DHCP_SERVER: &str = "/ip/dhcp-server";
pub const DHCP_NETWORK: &str = "/ip/dhcp-server/network";
pub const IP_ADDRESS: &str = "/ip/address";
pub const IP_ROUTE: &str = "/ip/route";
pub const SIMPLE_QUEUE: &str = "/queue/simple";
pub const HOTSPOT_USER: &str = "/ip/hotspot/user";
pub const SYSTEM_RESOURCE: &str = "/system/resource";
