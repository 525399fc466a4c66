//! Server side of the imager protocol

use super::channel::ChannelDescriptor;
use super::description::{Extents, ImageDescription};
use super::region::{PackOptions, RegionRect, pack_region};
use super::strided::StridedView;
use super::{DESCRIPTION_TYPE, Element, MAX_CHANNELS, REGION_TYPE};
use crate::connection::{
    Connection, DeliveryClass, Message, MessageSink, MessageTypeId, PING_TYPE, SYSTEM_SENDER,
    SenderId, SharedConnection,
};
use crate::core::types::timestamp_us;
use crate::error::{Error, Result};

/// Publishes one image's description and regions under a sender name
pub struct ImagerServer {
    connection: SharedConnection,
    sender: SenderId,
    system_sender: SenderId,
    description_type: MessageTypeId,
    region_type: MessageTypeId,
    ping_type: MessageTypeId,
    description: ImageDescription,
    description_sent: bool,
    region_class: DeliveryClass,
    scratch: Vec<u8>,
}

impl ImagerServer {
    /// Imager `name` with a `cols` x `rows` grid and no channels yet
    pub fn new(
        name: &str,
        connection: SharedConnection,
        cols: u32,
        rows: u32,
        extents: Extents,
    ) -> Result<Self> {
        let (Ok(cols_i), Ok(rows_i)) = (i32::try_from(cols), i32::try_from(rows)) else {
            return Err(Error::InvalidParameter(format!(
                "grid {}x{} does not fit the description fields",
                cols, rows
            )));
        };
        let ids = {
            let mut conn = connection.lock();
            (
                conn.register_sender(name),
                conn.register_sender(SYSTEM_SENDER),
                conn.register_message_type(DESCRIPTION_TYPE),
                conn.register_message_type(REGION_TYPE),
                conn.register_message_type(PING_TYPE),
            )
        };
        log::info!("Imager server {:?}: {}x{} grid", name, cols, rows);
        Ok(Self {
            connection,
            sender: ids.0,
            system_sender: ids.1,
            description_type: ids.2,
            region_type: ids.3,
            ping_type: ids.4,
            description: ImageDescription {
                rows: rows_i,
                cols: cols_i,
                extents,
                channels: Vec::new(),
            },
            description_sent: false,
            region_class: DeliveryClass::LowLatency,
            scratch: Vec::new(),
        })
    }

    /// Append a channel and return its index
    ///
    /// Name and units longer than the wire fields are truncated here, so the
    /// stored descriptor matches what remotes will decode.
    pub fn add_channel(&mut self, channel: ChannelDescriptor) -> Result<usize> {
        if self.description.channels.len() >= MAX_CHANNELS {
            return Err(Error::Capacity {
                what: "imager channels",
                requested: self.description.channels.len() + 1,
                limit: MAX_CHANNELS,
            });
        }
        self.description.channels.push(channel.bounded());
        self.description_sent = false;
        Ok(self.description.channels.len() - 1)
    }

    pub fn description(&self) -> &ImageDescription {
        &self.description
    }

    pub fn sender(&self) -> SenderId {
        self.sender
    }

    /// Delivery class used for regions; low latency unless changed
    pub fn set_region_delivery(&mut self, class: DeliveryClass) {
        self.region_class = class;
    }

    /// Send the full description, reliably
    pub fn send_description(&mut self) -> Result<()> {
        self.scratch.clear();
        self.description.encode(&mut self.scratch)?;
        self.connection.lock().send(
            self.sender,
            self.description_type,
            timestamp_us(),
            &self.scratch,
            DeliveryClass::Reliable,
        )?;
        self.description_sent = true;
        log::debug!(
            "Sent image description: {} channels",
            self.description.channels.len()
        );
        Ok(())
    }

    /// Pack and send one region stamped with the current time
    pub fn send_region<T: Element>(
        &mut self,
        channel: usize,
        rect: RegionRect,
        source: &StridedView<'_, T>,
        options: PackOptions,
    ) -> Result<()> {
        self.send_region_at(channel, rect, source, options, timestamp_us())
    }

    /// Pack and send one region with an explicit timestamp
    ///
    /// Nothing is sent if the region is rejected.
    pub fn send_region_at<T: Element>(
        &mut self,
        channel: usize,
        rect: RegionRect,
        source: &StridedView<'_, T>,
        options: PackOptions,
        timestamp_us: u64,
    ) -> Result<()> {
        let channel_index = match i16::try_from(channel) {
            Ok(c) if channel < self.description.channels.len() => c,
            _ => {
                return Err(Error::InvalidParameter(format!(
                    "channel {} not declared ({} channels)",
                    channel,
                    self.description.channels.len()
                )));
            }
        };
        if rect.c_max as i64 >= self.description.cols as i64
            || rect.r_max as i64 >= self.description.rows as i64
        {
            return Err(Error::InvalidParameter(format!(
                "region {:?} outside {}x{} grid",
                rect, self.description.cols, self.description.rows
            )));
        }

        pack_region(channel_index, rect, source, options, &mut self.scratch)?;
        let region = std::mem::take(&mut self.scratch);
        let sent = self.send_packed(&region, timestamp_us);
        self.scratch = region;
        sent
    }

    fn send_packed(&mut self, region: &[u8], timestamp_us: u64) -> Result<()> {
        if !self.description_sent {
            self.send_description()?;
        }
        self.connection.lock().send(
            self.sender,
            self.region_type,
            timestamp_us,
            region,
            self.region_class,
        )
    }

    /// [`send_region`](Self::send_region) over a `u8` buffer with strides
    pub fn send_region_u8(
        &mut self,
        channel: usize,
        rect: RegionRect,
        data: &[u8],
        col_stride: usize,
        row_stride: usize,
        options: PackOptions,
    ) -> Result<()> {
        let view = StridedView::new(data, col_stride, row_stride);
        self.send_region(channel, rect, &view, options)
    }

    pub fn send_region_u16(
        &mut self,
        channel: usize,
        rect: RegionRect,
        data: &[u16],
        col_stride: usize,
        row_stride: usize,
        options: PackOptions,
    ) -> Result<()> {
        let view = StridedView::new(data, col_stride, row_stride);
        self.send_region(channel, rect, &view, options)
    }

    pub fn send_region_f32(
        &mut self,
        channel: usize,
        rect: RegionRect,
        data: &[f32],
        col_stride: usize,
        row_stride: usize,
        options: PackOptions,
    ) -> Result<()> {
        let view = StridedView::new(data, col_stride, row_stride);
        self.send_region(channel, rect, &view, options)
    }
}

impl MessageSink for ImagerServer {
    /// Resend the description on every ping addressed to this imager
    fn on_message(&mut self, msg: &Message) -> Result<()> {
        if msg.message_type == self.ping_type
            && (msg.sender == self.sender || msg.sender == self.system_sender)
        {
            log::debug!("Ping received, resending image description");
            self.send_description()?;
        }
        Ok(())
    }
}
