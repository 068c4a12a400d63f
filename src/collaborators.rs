//! External interfaces this core depends on but does not implement.
//!
//! Per spec §1/§6, the MAC/PHY driver, the real-time clock, the monotonic tick source, and any
//! logging transport are collaborators with only their interface specified here - bus
//! transactions, bank selection, buffer DMA, RTC persistence, and log transport framing are
//! all out of scope for this crate.

use crate::{MacAddr, NowMs};

/// Interface required of the Ethernet MAC/PHY driver.
///
/// Implementations talk to the physical controller (e.g. over SPI to an ENC28J60-class part);
/// this crate only ever calls these methods and never touches the bus itself.
pub trait MacDriver {
    /// Reset, configure filters (unicast + CRC + pattern + broadcast), set the MAC address,
    /// and enable receive.
    fn mac_init(&mut self, mac_addr: MacAddr);

    /// Blocking transmit of exactly `buf.len()` bytes.
    fn mac_send(&mut self, buf: &[u8]);

    /// Non-blocking receive into `buf`; returns the number of bytes written, or 0 if no frame
    /// is currently available.
    fn mac_recv(&mut self, buf: &mut [u8]) -> usize;

    /// True iff the physical link is up.
    fn mac_link_up(&self) -> bool;

    /// Start accepting broadcast frames (used during DHCP, before an address is leased).
    fn mac_enable_broadcast(&mut self);

    /// Stop accepting broadcast frames (used once a lease is bound).
    fn mac_disable_broadcast(&mut self);

    /// Power down the PHY, e.g. before a low-power sleep.
    fn mac_power_down(&mut self);

    /// Power the PHY back up.
    fn mac_power_up(&mut self);
}

/// A single calendar date/time, used by [`crate::ntp`] to hand a converted NTP timestamp to
/// the real-time clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalendarDateTime {
    /// Full year, e.g. 2026.
    pub year: u16,
    /// Month, 1-12.
    pub month: u8,
    /// Day of month, 1-31.
    pub day: u8,
    /// Weekday, 1 (Sunday) through 7 (Saturday), per spec §4.8's `(4 + days) mod 7 + 1`
    /// (the Unix epoch, a Thursday, maps to 5). Matches the numbering most RTC peripherals
    /// use for their day-of-week register rather than ISO-8601's Monday-first convention.
    pub weekday: u8,
    /// Hour, 0-23.
    pub hour: u8,
    /// Minute, 0-59.
    pub minute: u8,
    /// Second, 0-59.
    pub second: u8,
}

/// Interface required of the real-time clock.
pub trait Rtc {
    /// Persist the time-of-day portion.
    fn set_time(&mut self, hour: u8, minute: u8, second: u8);

    /// Persist the calendar-date portion.
    fn set_date(&mut self, year: u16, month: u8, day: u8, weekday: u8);

    /// Read back the current date/time.
    fn get_datetime(&self) -> CalendarDateTime;
}

/// A monotonic millisecond tick source, read once per `poll` to drive every timeout in the
/// stack (DHCP retries, DNS retries, gateway ARP refresh).
pub trait TickSource {
    /// Current tick, in milliseconds, since an arbitrary but fixed epoch (e.g. power-on).
    fn now_ms(&self) -> NowMs;
}

/// A transport-agnostic sink for the structured events the stack reports (see
/// [`crate::NetEvent`]); the stack itself never formats strings, so an application wires this
/// to UDP syslog or a serial port and decides how (or whether) to render events as text.
pub trait LogSink {
    /// Record one line of free text.
    fn log(&mut self, msg: &str);
}

/// A [`LogSink`] that discards everything; useful as a default when the application doesn't
/// care to observe events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&mut self, _msg: &str) {}
}

/// Notified whenever an inbound ICMP echo reply matches an [`crate::icmp::IcmpWatcher`] that is
/// currently watching (spec §4.4 "Application may register `on_ping_reply(src_ip)`"). Modeled
/// as a trait rather than a C-style function pointer, in the same spirit as [`crate::TcpClientCallbacks`].
pub trait PingObserver {
    /// Called with the source address of the matched echo reply.
    fn on_ping_reply(&mut self, src_ip: crate::IpV4Addr);
}

/// A [`PingObserver`] that ignores every reply; the default when the application isn't pinging
/// anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPingObserver;

impl PingObserver for NullPingObserver {
    fn on_ping_reply(&mut self, _src_ip: crate::IpV4Addr) {}
}
