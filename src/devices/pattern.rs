//! Synthetic imager
//!
//! Publishes a moving 8-bit gradient through an [`ImagerServer`]. The frame
//! is larger than one region may be, so every poll sends the next
//! horizontal band of at most `max_region_values(1)` values, and the
//! pattern advances once the last band of a frame has gone out.

use crate::connection::{Message, MessageSink, SharedConnection};
use crate::core::Device;
use crate::core::types::Capability;
use crate::error::{Error, Result};
use crate::imager::{ChannelDescriptor, Element, Extents, ImagerServer, PackOptions, RegionRect};

pub struct PatternImager {
    name: String,
    server: ImagerServer,
    cols: u32,
    rows: u32,
    band_rows: u32,
    next_row: u32,
    phase: u8,
    frame: Vec<u8>,
}

impl PatternImager {
    pub fn new(name: &str, cols: u32, rows: u32, connection: SharedConnection) -> Result<Self> {
        let max_side = u16::MAX as u32 + 1;
        if cols == 0 || rows == 0 || cols > max_side || rows > max_side {
            return Err(Error::Config(format!(
                "{}: image size {}x{} out of range",
                name, cols, rows
            )));
        }
        let band_rows = (u8::MAX_REGION_VALUES as u32 / cols).min(rows);
        if band_rows == 0 {
            return Err(Error::Config(format!(
                "{}: {} columns exceed one region",
                name, cols
            )));
        }

        let mut server = ImagerServer::new(name, connection, cols, rows, Extents::default())?;
        server.add_channel(ChannelDescriptor::new("intensity", "unsigned8bit"))?;
        let mut imager = Self {
            name: name.to_string(),
            server,
            cols,
            rows,
            band_rows,
            next_row: 0,
            phase: 0,
            frame: vec![0; cols as usize * rows as usize],
        };
        imager.render();
        Ok(imager)
    }

    /// Rows sent per poll
    pub fn band_rows(&self) -> u32 {
        self.band_rows
    }

    pub fn server(&self) -> &ImagerServer {
        &self.server
    }

    fn render(&mut self) {
        let cols = self.cols as usize;
        for (i, px) in self.frame.iter_mut().enumerate() {
            let (r, c) = (i / cols, i % cols);
            *px = (c + r).wrapping_add(self.phase as usize) as u8;
        }
    }
}

impl Device for PatternImager {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::ProducesImageRegions]
    }

    fn poll(&mut self) -> Result<usize> {
        let last_row = (self.next_row + self.band_rows).min(self.rows) - 1;
        let rect = RegionRect::new(
            0,
            (self.cols - 1) as u16,
            self.next_row as u16,
            last_row as u16,
        );
        self.server.send_region_u8(
            0,
            rect,
            &self.frame,
            1,
            self.cols as usize,
            PackOptions::default(),
        )?;

        self.next_row = last_row + 1;
        if self.next_row >= self.rows {
            self.next_row = 0;
            self.phase = self.phase.wrapping_add(1);
            self.render();
        }
        Ok(1)
    }

    fn on_message(&mut self, msg: &Message) -> Result<()> {
        self.server.on_message(msg)
    }

    fn shutdown(&mut self) -> Result<()> {
        log::info!("{}: stopped", self.name);
        Ok(())
    }
}
