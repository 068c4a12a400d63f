//! Network Time Protocol client: request + calendar conversion (spec §4.8).
//!
//! Grounded on `examples/original_source/Src/ntp.c`'s `client_ntp_request`/
//! `client_ntp_process_answer`: same fixed 48-octet request payload and the same
//! seconds-since-epoch arithmetic, reworked to hand a [`CalendarDateTime`] to the collaborator
//! [`Rtc`] trait instead of calling a vendor HAL directly.

use crate::*;

/// Well-known NTP server port.
pub const NTP_SERVER_PORT: u16 = 123;
/// Fixed length of an NTP client-mode request/response payload (RFC 5905 short header only).
pub const NTP_PAYLOAD_LEN: usize = 48;
/// High byte of the NTP client's source port (grounded on the original's literal `10`).
pub const NTP_SRC_PORT_H: u8 = 10;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
const NTP_UNIX_EPOCH_OFFSET: u32 = 2_208_988_800;

/// First 10 octets of every request: LI=0, VN=4, mode=3 (client), stratum/poll/precision hints,
/// root delay/dispersion all zero (spec §4.8).
const NTP_REQUEST_HEADER: [u8; 10] = [0xe3, 0x00, 0x04, 0xfa, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00];

/// Broadcast an NTP client-mode request to `ntp_server`. `src_port_low` is the low byte of the
/// source port (spec: "request(ntp_ip, src_port_low)"); the high byte is always
/// [`NTP_SRC_PORT_H`].
#[allow(clippy::too_many_arguments)]
pub fn request(
    buf: &mut [u8],
    mac: &mut impl MacDriver,
    our_mac: MacAddr,
    our_ip: IpV4Addr,
    dst_mac: MacAddr,
    ntp_server: IpV4Addr,
    src_port_low: u8,
) {
    let mut payload = [0_u8; NTP_PAYLOAD_LEN];
    payload[..NTP_REQUEST_HEADER.len()].copy_from_slice(&NTP_REQUEST_HEADER);
    let src_port = ((NTP_SRC_PORT_H as u16) << 8) | (src_port_low as u16);
    crate::udp::send_udp(buf, &payload, mac, our_mac, our_ip, dst_mac, src_port, ntp_server, NTP_SERVER_PORT);
}

/// Read the 32-bit transmit-timestamp seconds field (40 octets into the NTP payload, i.e.
/// buffer offset `UDP_DATA_OFFSET + 40`) and convert to a wall-clock [`CalendarDateTime`].
pub fn process_answer(buf: &[u8]) -> CalendarDateTime {
    let offset = UDP_DATA_OFFSET + 40;
    let ntp_seconds = u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]]);
    let unix_seconds = ntp_seconds.saturating_sub(NTP_UNIX_EPOCH_OFFSET);
    unix_to_calendar(unix_seconds)
}

/// Apply a converted timestamp to the real-time clock collaborator.
pub fn apply_to_rtc(datetime: CalendarDateTime, rtc: &mut impl Rtc) {
    rtc.set_time(datetime.hour, datetime.minute, datetime.second);
    rtc.set_date(datetime.year, datetime.month, datetime.day, datetime.weekday);
}

fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// Gregorian calendar conversion of a Unix timestamp, accounting for leap years. Weekday uses
/// `(4 + days_since_epoch) mod 7 + 1` since 1970-01-01 was a Thursday.
fn unix_to_calendar(unix_seconds: u32) -> CalendarDateTime {
    let second = (unix_seconds % 60) as u8;
    let minute = ((unix_seconds / 60) % 60) as u8;
    let hour = ((unix_seconds / 3600) % 24) as u8;
    let mut days = unix_seconds / 86_400;

    let weekday = ((4 + days) % 7 + 1) as u8;

    let mut year: u32 = 1970;
    loop {
        let year_len = if is_leap_year(year) { 366 } else { 365 };
        if days < year_len {
            break;
        }
        days -= year_len;
        year += 1;
    }

    let mut month_lengths = [31_u32, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if is_leap_year(year) {
        month_lengths[1] = 29;
    }

    let mut month: u32 = 0;
    while month < 12 {
        if days < month_lengths[month as usize] {
            break;
        }
        days -= month_lengths[month as usize];
        month += 1;
    }
    let day = (days + 1) as u8;

    CalendarDateTime {
        year: year as u16,
        month: (month + 1) as u8,
        day,
        weekday,
        hour,
        minute,
        second,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    extern crate std;
    use std::vec::Vec;

    #[derive(Default)]
    struct FakeMac {
        sent: Vec<u8>,
    }

    impl MacDriver for FakeMac {
        fn mac_init(&mut self, _mac_addr: MacAddr) {}
        fn mac_send(&mut self, buf: &[u8]) {
            self.sent.clear();
            self.sent.extend_from_slice(buf);
        }
        fn mac_recv(&mut self, _buf: &mut [u8]) -> usize {
            0
        }
        fn mac_link_up(&self) -> bool {
            true
        }
        fn mac_enable_broadcast(&mut self) {}
        fn mac_disable_broadcast(&mut self) {}
        fn mac_power_down(&mut self) {}
        fn mac_power_up(&mut self) {}
    }

    #[derive(Default)]
    struct FakeRtc {
        datetime: Option<CalendarDateTime>,
    }

    impl Rtc for FakeRtc {
        fn set_time(&mut self, hour: u8, minute: u8, second: u8) {
            let mut dt = self.datetime.unwrap_or(CalendarDateTime {
                year: 0,
                month: 0,
                day: 0,
                weekday: 0,
                hour: 0,
                minute: 0,
                second: 0,
            });
            dt.hour = hour;
            dt.minute = minute;
            dt.second = second;
            self.datetime = Some(dt);
        }
        fn set_date(&mut self, year: u16, month: u8, day: u8, weekday: u8) {
            let mut dt = self.datetime.unwrap_or(CalendarDateTime {
                year: 0,
                month: 0,
                day: 0,
                weekday: 0,
                hour: 0,
                minute: 0,
                second: 0,
            });
            dt.year = year;
            dt.month = month;
            dt.day = day;
            dt.weekday = weekday;
            self.datetime = Some(dt);
        }
        fn get_datetime(&self) -> CalendarDateTime {
            self.datetime.unwrap()
        }
    }

    #[test]
    fn test_request_payload_carries_fixed_header() {
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let mut mac = FakeMac::default();
        let our_mac = MacAddr::new([2, 0, 0, 0, 0, 1]);
        let our_ip = IpV4Addr::new([10, 0, 0, 10]);
        let dst_mac = MacAddr::new([2, 0, 0, 0, 0, 2]);
        let ntp_server = IpV4Addr::new([10, 0, 0, 1]);

        request(&mut buf, &mut mac, our_mac, our_ip, dst_mac, ntp_server, 7);

        let udp = read_udp_header(&mac.sent);
        assert_eq!(udp.dst_port, NTP_SERVER_PORT);
        assert_eq!(udp.src_port, ((NTP_SRC_PORT_H as u16) << 8) | 7);
        assert_eq!(&mac.sent[UDP_DATA_OFFSET..UDP_DATA_OFFSET + 10], &NTP_REQUEST_HEADER);
        assert_eq!(udp.length as usize, UDP_HEADER_LEN + NTP_PAYLOAD_LEN);
    }

    #[test]
    fn test_process_answer_converts_known_timestamp() {
        // 2024-01-01T00:00:00Z is 1704067200 seconds after the Unix epoch (a Monday; the
        // epoch itself, a Thursday, maps to weekday 5 under this formula, so Monday is 2).
        let unix_seconds: u32 = 1_704_067_200;
        let ntp_seconds = unix_seconds + NTP_UNIX_EPOCH_OFFSET;

        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let offset = UDP_DATA_OFFSET + 40;
        buf[offset..offset + 4].copy_from_slice(&ntp_seconds.to_be_bytes());

        let dt = process_answer(&buf);
        assert_eq!(dt.year, 2024);
        assert_eq!(dt.month, 1);
        assert_eq!(dt.day, 1);
        assert_eq!(dt.hour, 0);
        assert_eq!(dt.minute, 0);
        assert_eq!(dt.second, 0);
        assert_eq!(dt.weekday, 2);
    }

    #[test]
    fn test_leap_year_day_count() {
        // 2024-02-29 exists because 2024 is a leap year; 2024-03-01 is one day later.
        let base: u32 = 1_709_164_800; // 2024-02-29T00:00:00Z
        let dt = unix_to_calendar(base);
        assert_eq!((dt.month, dt.day), (2, 29));
        let dt_next = unix_to_calendar(base + 86_400);
        assert_eq!((dt_next.month, dt_next.day), (3, 1));
    }

    #[test]
    fn test_apply_to_rtc_round_trips_fields() {
        let dt = CalendarDateTime { year: 2026, month: 7, day: 27, weekday: 1, hour: 12, minute: 30, second: 5 };
        let mut rtc = FakeRtc::default();
        apply_to_rtc(dt, &mut rtc);
        assert_eq!(rtc.get_datetime(), dt);
    }
}
