//! Client side of the imager protocol
//!
//! An [`ImagerRemote`] keeps the last description it received and checks
//! every region against it before any listener sees the region. Regions that
//! arrive first, or that name a channel or bounds the description does not
//! have, are dropped and counted.

use super::channel::ChannelDescriptor;
use super::description::{Extents, ImageDescription};
use super::region::Region;
use super::{DESCRIPTION_TYPE, REGION_TYPE};
use crate::connection::{
    CONNECTION_DROPPED_TYPE, Connection, DeliveryClass, Message, MessageSink, MessageTypeId,
    PING_TYPE, SYSTEM_SENDER, SenderId, SharedConnection,
};
use crate::core::listeners::{ListenerControl, ListenerList, ListenerToken};
use crate::core::types::timestamp_us;
use crate::error::{Error, Result};

/// Receives regions; the view is only valid during the call
pub trait RegionListener: Send {
    fn on_region(&mut self, region: &Region<'_>, timestamp_us: u64);
}

impl<F> RegionListener for F
where
    F: FnMut(&Region<'_>, u64) + Send,
{
    fn on_region(&mut self, region: &Region<'_>, timestamp_us: u64) {
        self(region, timestamp_us)
    }
}

/// Notified whenever a new description replaces the cached one
pub trait DescriptionListener: Send {
    fn on_description(&mut self, description: &ImageDescription, timestamp_us: u64);
}

impl<F> DescriptionListener for F
where
    F: FnMut(&ImageDescription, u64) + Send,
{
    fn on_description(&mut self, description: &ImageDescription, timestamp_us: u64) {
        self(description, timestamp_us)
    }
}

struct Ids {
    sender: SenderId,
    system_sender: SenderId,
    description: MessageTypeId,
    region: MessageTypeId,
    ping: MessageTypeId,
    dropped: MessageTypeId,
}

/// Receives one named imager
pub struct ImagerRemote {
    connection: SharedConnection,
    ids: Ids,
    description: Option<ImageDescription>,
    region_listeners: ListenerList<dyn RegionListener>,
    description_listeners: ListenerList<dyn DescriptionListener>,
    dropped_regions: u64,
}

impl ImagerRemote {
    /// Attach to imager `name` and ask its server for a description
    pub fn new(name: &str, connection: &SharedConnection) -> Result<Self> {
        let ids = {
            let mut conn = connection.lock();
            Ids {
                sender: conn.register_sender(name),
                system_sender: conn.register_sender(SYSTEM_SENDER),
                description: conn.register_message_type(DESCRIPTION_TYPE),
                region: conn.register_message_type(REGION_TYPE),
                ping: conn.register_message_type(PING_TYPE),
                dropped: conn.register_message_type(CONNECTION_DROPPED_TYPE),
            }
        };
        let remote = Self {
            connection: connection.clone(),
            ids,
            description: None,
            region_listeners: ListenerList::new(),
            description_listeners: ListenerList::new(),
            dropped_regions: 0,
        };
        remote.request_description()?;
        Ok(remote)
    }

    /// Ping the server, which answers with its full description
    pub fn request_description(&self) -> Result<()> {
        self.connection.lock().send(
            self.ids.sender,
            self.ids.ping,
            timestamp_us(),
            &[],
            DeliveryClass::Reliable,
        )
    }

    pub fn description(&self) -> Option<&ImageDescription> {
        self.description.as_ref()
    }

    pub fn rows(&self) -> Option<i32> {
        self.description.as_ref().map(|d| d.rows)
    }

    pub fn cols(&self) -> Option<i32> {
        self.description.as_ref().map(|d| d.cols)
    }

    pub fn extents(&self) -> Option<Extents> {
        self.description.as_ref().map(|d| d.extents)
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelDescriptor> {
        self.description.as_ref()?.channel(index)
    }

    pub fn channel_count(&self) -> usize {
        self.description.as_ref().map_or(0, |d| d.channels.len())
    }

    /// Regions discarded as out of order or inconsistent
    pub fn dropped_regions(&self) -> u64 {
        self.dropped_regions
    }

    pub fn register_region_listener(&mut self, listener: Box<dyn RegionListener>) -> ListenerToken {
        self.region_listeners.register(listener)
    }

    pub fn on_region<F>(&mut self, f: F) -> ListenerToken
    where
        F: FnMut(&Region<'_>, u64) + Send + 'static,
    {
        self.region_listeners.register(Box::new(f))
    }

    pub fn unregister_region_listener(&mut self, token: ListenerToken) -> bool {
        self.region_listeners.unregister(token)
    }

    /// Handle for changing region listeners from inside a callback
    pub fn region_control(&self) -> ListenerControl<dyn RegionListener> {
        self.region_listeners.control()
    }

    pub fn register_description_listener(
        &mut self,
        listener: Box<dyn DescriptionListener>,
    ) -> ListenerToken {
        self.description_listeners.register(listener)
    }

    pub fn on_description<F>(&mut self, f: F) -> ListenerToken
    where
        F: FnMut(&ImageDescription, u64) + Send + 'static,
    {
        self.description_listeners.register(Box::new(f))
    }

    pub fn unregister_description_listener(&mut self, token: ListenerToken) -> bool {
        self.description_listeners.unregister(token)
    }

    pub fn description_control(&self) -> ListenerControl<dyn DescriptionListener> {
        self.description_listeners.control()
    }

    fn handle_description(&mut self, msg: &Message) -> Result<()> {
        let description = ImageDescription::decode(&msg.payload)?;
        log::debug!(
            "Image description: {}x{}, {} channels",
            description.cols,
            description.rows,
            description.channels.len()
        );
        let description = &*self.description.insert(description);
        self.description_listeners
            .dispatch(|l| l.on_description(description, msg.timestamp_us));
        Ok(())
    }

    fn handle_region(&mut self, msg: &Message) -> Result<()> {
        let checked = match &self.description {
            None => Err(Error::ProtocolOrder(
                "region received before any description".into(),
            )),
            Some(description) => {
                Region::parse(&msg.payload).and_then(|region| consistent(description, region))
            }
        };
        match checked {
            Ok(region) => {
                self.region_listeners
                    .dispatch(|l| l.on_region(&region, msg.timestamp_us));
                Ok(())
            }
            Err(e) => {
                self.dropped_regions += 1;
                Err(e)
            }
        }
    }
}

/// Region if its channel and bounds agree with `description`
fn consistent<'a>(description: &ImageDescription, region: Region<'a>) -> Result<Region<'a>> {
    let channel = region.channel();
    if channel < 0 || channel as usize >= description.channels.len() {
        return Err(Error::ProtocolOrder(format!(
            "region for channel {} but description has {}",
            channel,
            description.channels.len()
        )));
    }
    let rect = region.rect();
    if rect.c_max as i64 >= description.cols as i64 || rect.r_max as i64 >= description.rows as i64 {
        return Err(Error::ProtocolOrder(format!(
            "region {:?} outside {}x{} grid",
            rect, description.cols, description.rows
        )));
    }
    Ok(region)
}

impl MessageSink for ImagerRemote {
    fn on_message(&mut self, msg: &Message) -> Result<()> {
        if msg.message_type == self.ids.dropped && msg.sender == self.ids.system_sender {
            if self.description.take().is_some() {
                log::info!("Connection dropped, image description cleared");
            }
            return Ok(());
        }
        if msg.sender != self.ids.sender {
            return Ok(());
        }
        if msg.message_type == self.ids.description {
            self.handle_description(msg)
        } else if msg.message_type == self.ids.region {
            self.handle_region(msg)
        } else {
            Ok(())
        }
    }
}
