//! Fuzz target for discovery datagram parsing

#![no_main]

use lanshare_discovery::Announcement;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(announcement) = Announcement::decode(data) {
        assert!(!announcement.device_id.is_empty());
        assert_eq!(Announcement::decode(&announcement.encode()), Ok(announcement));
    }
});
