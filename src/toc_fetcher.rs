//! Element-by-element TOC download with a CRC-keyed cache fast path.
//!
//! The same handshake serves the log and the parameter subsystems, only
//! the port differs. Protocol version 4 introduced the V2 commands with
//! 16-bit identifiers; earlier firmware is limited to 8-bit identifiers.

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crtp::{Packet, Port};
use crate::link::Uplink;
use crate::toc::{Toc, TocCache};
use crate::{Error, Result};

pub(crate) const TOC_CHANNEL: u8 = 0;

const CMD_TOC_ELEMENT: u8 = 0;
const CMD_TOC_INFO: u8 = 1;
const CMD_TOC_ITEM_V2: u8 = 2;
const CMD_TOC_INFO_V2: u8 = 3;

const V1_MAX_ITEMS: u16 = 256;
const V2_MAX_ITEMS: u16 = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    Idle,
    GetInfo,
    GetElement,
}

/// State machine driving one TOC download.
///
/// `start` sends the info request; every later step happens in
/// [TocFetcher::handle_packet] as the replies arrive on the TOC channel.
#[derive(Debug)]
pub(crate) struct TocFetcher {
    port: Port,
    use_v2: bool,
    state: FetchState,
    crc: u32,
    nbr_of_items: u16,
    requested_index: u16,
}

impl TocFetcher {
    pub fn new(port: Port, protocol_version: u8) -> Self {
        TocFetcher {
            port,
            use_v2: protocol_version >= 4,
            state: FetchState::Idle,
            crc: 0,
            nbr_of_items: 0,
            requested_index: 0,
        }
    }

    /// Request the TOC info block, entering the download state machine.
    pub fn start(&mut self, uplink: &Uplink) {
        self.state = FetchState::GetInfo;
        let cmd = if self.use_v2 {
            CMD_TOC_INFO_V2
        } else {
            CMD_TOC_INFO
        };
        uplink.send(self.port, TOC_CHANNEL, vec![cmd]);
    }

    fn item_cmd(&self) -> u8 {
        if self.use_v2 {
            CMD_TOC_ITEM_V2
        } else {
            CMD_TOC_ELEMENT
        }
    }

    fn info_cmd(&self) -> u8 {
        if self.use_v2 {
            CMD_TOC_INFO_V2
        } else {
            CMD_TOC_INFO
        }
    }

    fn request_element(&self, uplink: &Uplink, index: u16) {
        let payload = if self.use_v2 {
            vec![CMD_TOC_ITEM_V2, (index & 0xff) as u8, (index >> 8) as u8]
        } else {
            vec![CMD_TOC_ELEMENT, index as u8]
        };
        uplink.send(self.port, TOC_CHANNEL, payload);
    }

    /// Advance on one TOC-channel reply. Returns `true` once the TOC held
    /// in `toc` is complete.
    pub fn handle_packet<I>(
        &mut self,
        pk: &Packet,
        toc: &mut Toc<I>,
        cache: &TocCache,
        uplink: &Uplink,
    ) -> Result<bool>
    where
        I: TryFrom<u8, Error = Error> + Serialize + DeserializeOwned,
    {
        let data = pk.payload();
        let Some(&cmd) = data.first() else {
            return Ok(false);
        };

        match self.state {
            FetchState::GetInfo if cmd == self.info_cmd() => {
                self.handle_info(data, toc, cache, uplink)
            }
            FetchState::GetElement if cmd == self.item_cmd() => {
                self.handle_element(data, toc, cache, uplink)
            }
            _ => Ok(false),
        }
    }

    fn handle_info<I>(
        &mut self,
        data: &[u8],
        toc: &mut Toc<I>,
        cache: &TocCache,
        uplink: &Uplink,
    ) -> Result<bool>
    where
        I: DeserializeOwned,
    {
        let (nbr_of_items, crc) = if self.use_v2 {
            if data.len() < 7 {
                return Err(Error::ProtocolError("short TOC info reply".to_owned()));
            }
            (
                u16::from_le_bytes(data[1..3].try_into()?),
                u32::from_le_bytes(data[3..7].try_into()?),
            )
        } else {
            if data.len() < 6 {
                return Err(Error::ProtocolError("short TOC info reply".to_owned()));
            }
            (data[1] as u16, u32::from_le_bytes(data[2..6].try_into()?))
        };

        let max_items = if self.use_v2 {
            V2_MAX_ITEMS
        } else {
            V1_MAX_ITEMS
        };
        if nbr_of_items > max_items {
            self.state = FetchState::Idle;
            return Err(Error::ProtocolError(format!(
                "device reports {} TOC items, limit is {}",
                nbr_of_items, max_items
            )));
        }

        if toc.complete && toc.crc == crc {
            self.state = FetchState::Idle;
            info!("TOC crc {:08X} already in memory", crc);
            return Ok(true);
        }

        if let Some(cached) = cache.read::<I>(crc) {
            *toc = cached;
            self.state = FetchState::Idle;
            return Ok(true);
        }

        self.crc = crc;
        self.nbr_of_items = nbr_of_items;

        if nbr_of_items == 0 {
            toc.clear();
            toc.crc = crc;
            toc.complete = true;
            self.state = FetchState::Idle;
            return Ok(true);
        }

        info!("requesting {} TOC items", nbr_of_items);
        toc.clear();
        self.state = FetchState::GetElement;
        self.requested_index = 0;
        self.request_element(uplink, 0);
        Ok(false)
    }

    fn handle_element<I>(
        &mut self,
        data: &[u8],
        toc: &mut Toc<I>,
        cache: &TocCache,
        uplink: &Uplink,
    ) -> Result<bool>
    where
        I: TryFrom<u8, Error = Error> + Serialize,
    {
        let (ident, element) = if self.use_v2 {
            if data.len() < 4 {
                return Err(Error::ProtocolError("short TOC element reply".to_owned()));
            }
            (u16::from_le_bytes(data[1..3].try_into()?), &data[3..])
        } else {
            if data.len() < 3 {
                return Err(Error::ProtocolError("short TOC element reply".to_owned()));
            }
            (data[1] as u16, &data[2..])
        };

        if ident != self.requested_index {
            return Ok(false);
        }

        let info = I::try_from(element[0])?;
        let mut strings = element[1..].split(|b| *b == 0);
        let group = strings
            .next()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .ok_or_else(|| Error::ProtocolError("TOC element without group".to_owned()))?;
        let name = strings
            .next()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .ok_or_else(|| Error::ProtocolError("TOC element without name".to_owned()))?;

        toc.add_element(ident, &group, &name, info);

        if ident == self.nbr_of_items - 1 {
            toc.crc = self.crc;
            toc.complete = true;
            cache.write(self.crc, toc);
            self.state = FetchState::Idle;
            info!("TOC download complete ({} items)", self.nbr_of_items);
            return Ok(true);
        }

        self.requested_index += 1;
        self.request_element(uplink, self.requested_index);
        Ok(false)
    }
}

/// Log the error of a fetch step; the fetch stalls until the next reset.
pub(crate) fn report_fetch_error(port: Port, error: &Error) {
    warn!("TOC fetch on port {:?} failed: {}", port, error);
}
