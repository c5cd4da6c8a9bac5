//! NTPv4 packet codec (RFC 5905, 48-byte header, no extensions).
//!
//! ```text
//!  0      1        2      3      4       8       12      16     24     32     40   48
//!  ├LI/VN/M┼stratum┼poll──┼prec──┼rootdly┼rootdsp┼refid──┼ref───┼orig──┼recv──┼xmit┤
//! ```
//!
//! Timestamps are 32.32 fixed point seconds since 1900-01-01.  Era 1
//! (after 2036-02-07) is folded in when converting to Unix time.

use core::fmt;

pub const NTP_PORT: u16 = 123;
pub const PACKET_LEN: usize = 48;
/// Seconds from the NTP epoch (1900) to the Unix epoch (1970).
pub const NTP_UNIX_OFFSET_S: u64 = 2_208_988_800;

pub const MODE_CLIENT: u8 = 3;
pub const MODE_SERVER: u8 = 4;
pub const VERSION: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    pub secs: u32,
    pub frac: u32,
}

impl NtpTimestamp {
    pub fn from_unix_us(us: u64) -> Self {
        let secs = (us / 1_000_000 + NTP_UNIX_OFFSET_S) as u32;
        let frac = (((us % 1_000_000) << 32) / 1_000_000) as u32;
        Self { secs, frac }
    }

    pub fn to_unix_us(self) -> u64 {
        let mut secs = u64::from(self.secs);
        if secs < NTP_UNIX_OFFSET_S {
            secs += 1 << 32;
        }
        let usec = (u64::from(self.frac) * 1_000_000 + (1 << 31)) >> 32;
        (secs - NTP_UNIX_OFFSET_S) * 1_000_000 + usec
    }

    pub fn is_zero(self) -> bool {
        self.secs == 0 && self.frac == 0
    }

    fn read(b: &[u8]) -> Self {
        Self {
            secs: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            frac: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
        }
    }

    fn write(self, b: &mut [u8]) {
        b[..4].copy_from_slice(&self.secs.to_be_bytes());
        b[4..8].copy_from_slice(&self.frac.to_be_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    TooShort(usize),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(n) => write!(f, "NTP packet too short ({n} bytes)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpPacket {
    pub leap: u8,
    pub version: u8,
    pub mode: u8,
    pub stratum: u8,
    pub poll: i8,
    pub precision: i8,
    pub root_delay: u32,
    pub root_dispersion: u32,
    pub reference_id: [u8; 4],
    pub reference: NtpTimestamp,
    pub origin: NtpTimestamp,
    pub receive: NtpTimestamp,
    pub transmit: NtpTimestamp,
}

impl NtpPacket {
    /// Client request carrying `transmit` as its (echoed) origin cookie.
    pub fn client_request(transmit: NtpTimestamp) -> Self {
        Self { version: VERSION, mode: MODE_CLIENT, transmit, ..Self::default() }
    }

    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut b = [0u8; PACKET_LEN];
        b[0] = (self.leap & 0x3) << 6 | (self.version & 0x7) << 3 | (self.mode & 0x7);
        b[1] = self.stratum;
        b[2] = self.poll as u8;
        b[3] = self.precision as u8;
        b[4..8].copy_from_slice(&self.root_delay.to_be_bytes());
        b[8..12].copy_from_slice(&self.root_dispersion.to_be_bytes());
        b[12..16].copy_from_slice(&self.reference_id);
        self.reference.write(&mut b[16..24]);
        self.origin.write(&mut b[24..32]);
        self.receive.write(&mut b[32..40]);
        self.transmit.write(&mut b[40..48]);
        b
    }

    /// Decode a header.  Trailing bytes (extensions, MAC) are ignored.
    pub fn decode(b: &[u8]) -> Result<Self, PacketError> {
        if b.len() < PACKET_LEN {
            return Err(PacketError::TooShort(b.len()));
        }
        Ok(Self {
            leap: b[0] >> 6,
            version: (b[0] >> 3) & 0x7,
            mode: b[0] & 0x7,
            stratum: b[1],
            poll: b[2] as i8,
            precision: b[3] as i8,
            root_delay: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            root_dispersion: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            reference_id: [b[12], b[13], b[14], b[15]],
            reference: NtpTimestamp::read(&b[16..24]),
            origin: NtpTimestamp::read(&b[24..32]),
            receive: NtpTimestamp::read(&b[32..40]),
            transmit: NtpTimestamp::read(&b[40..48]),
        })
    }
}
