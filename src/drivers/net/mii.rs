//! MII PHY management over the driver's MDIO entry points.

use core::fmt;

use super::{DeviceError, NetDriver};

/// Basic mode control register
pub const MII_BMCR: u8 = 0x00;
/// Basic mode status register
pub const MII_BMSR: u8 = 0x01;
pub const MII_PHYSID1: u8 = 0x02;
pub const MII_PHYSID2: u8 = 0x03;
/// Vendor speed/duplex status register
pub const MII_DSCSR: u8 = 0x11;

pub const BMCR_RESET: u16 = 0x8000;
pub const BMSR_ANEG_COMPLETE: u16 = 0x0020;

/// Reads of BMCR before giving up on a reset that never self-clears.
const RESET_POLL_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiiPhy {
    pub addr: u8,
    pub vendor_id: u16,
    pub device_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Unknown,
    Half10,
    Full10,
    Half100,
    Full100,
}

impl LinkSpeed {
    fn from_dscsr(value: u16) -> Self {
        match value >> 12 {
            1 => LinkSpeed::Half10,
            2 => LinkSpeed::Full10,
            4 => LinkSpeed::Half100,
            8 => LinkSpeed::Full100,
            _ => LinkSpeed::Unknown,
        }
    }
}

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkSpeed::Unknown => "unknown speed",
            LinkSpeed::Half10 => "10M Half-Duplex",
            LinkSpeed::Full10 => "10M Full-Duplex",
            LinkSpeed::Half100 => "100M Half-Duplex",
            LinkSpeed::Full100 => "100M Full-Duplex",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub connected: bool,
    pub speed: LinkSpeed,
}

/// Read the ID registers at `addr`. An absent PHY answers all-ones or all-zeros.
pub fn probe(driver: &dyn NetDriver, addr: u8) -> Option<MiiPhy> {
    let vendor_id = driver.mdio_read(addr, MII_PHYSID1)?;
    let device_id = driver.mdio_read(addr, MII_PHYSID2)?;
    match (vendor_id, device_id) {
        (0xFFFF, 0xFFFF) | (0, 0) => None,
        _ => Some(MiiPhy {
            addr,
            vendor_id,
            device_id,
        }),
    }
}

/// Set BMCR reset and wait for the PHY to clear it. Returns whether it did.
pub fn reset(driver: &dyn NetDriver, phy: MiiPhy) -> bool {
    if driver.mdio_write(phy.addr, MII_BMCR, BMCR_RESET).is_err() {
        return false;
    }
    (0..RESET_POLL_LIMIT).any(|_| {
        matches!(driver.mdio_read(phy.addr, MII_BMCR), Some(bmcr) if bmcr & BMCR_RESET == 0)
    })
}

pub fn link_status(driver: &dyn NetDriver, phy: MiiPhy) -> Result<LinkStatus, DeviceError> {
    let bmsr = driver.mdio_read(phy.addr, MII_BMSR).ok_or(DeviceError::Io)?;
    if bmsr & BMSR_ANEG_COMPLETE == 0 {
        return Ok(LinkStatus {
            connected: false,
            speed: LinkSpeed::Unknown,
        });
    }
    let dscsr = driver.mdio_read(phy.addr, MII_DSCSR).ok_or(DeviceError::Io)?;
    Ok(LinkStatus {
        connected: true,
        speed: LinkSpeed::from_dscsr(dscsr),
    })
}
