use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use minifb::{Key, KeyRepeat, Window, WindowOptions};

use crate::{
    pipeline::{FramePipeline, recv_latest_frame},
    types::Frame,
};

const WINDOW_TITLE: &str = "Virtual Try-On";
const FRAME_WAIT: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavAction {
    Previous,
    Next,
    Quit,
}

/// Left/A and Right/D cycle garments, Escape quits.
pub fn nav_action(key: Key) -> Option<NavAction> {
    match key {
        Key::Left | Key::A => Some(NavAction::Previous),
        Key::Right | Key::D => Some(NavAction::Next),
        Key::Escape => Some(NavAction::Quit),
        _ => None,
    }
}

/// Packs RGB bytes into minifb's 0RGB words.
pub fn pack_rgb(rgb: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        rgb.chunks_exact(3)
            .map(|px| ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | px[2] as u32),
    );
}

fn window_title(file: &str) -> String {
    format!("{WINDOW_TITLE}: {file} (←/→ or A/D to change, Esc to exit)")
}

struct DisplayWindow {
    window: Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl DisplayWindow {
    fn open(frame: &Frame) -> Result<Self> {
        let (width, height) = (frame.width as usize, frame.height as usize);
        let mut window = Window::new(
            WINDOW_TITLE,
            width,
            height,
            WindowOptions {
                resize: true,
                ..WindowOptions::default()
            },
        )
        .map_err(|e| anyhow!("failed to create window: {e}"))?;
        window.set_target_fps(60);

        Ok(Self {
            window,
            buffer: Vec::with_capacity(width * height),
            width,
            height,
        })
    }

    fn show(&mut self, frame: &Frame) -> Result<()> {
        self.width = frame.width as usize;
        self.height = frame.height as usize;
        pack_rgb(&frame.rgb, &mut self.buffer);
        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)
            .map_err(|e| anyhow!("window update failed: {e}"))
    }

    fn poll(&mut self) {
        self.window.update();
    }
}

/// Runs the local mirror until Escape or the window closes.
pub fn run_display(mut pipeline: FramePipeline, frame_rx: Receiver<Frame>) -> Result<()> {
    let mut window: Option<DisplayWindow> = None;
    let mut title = String::new();
    let mut tracking = false;

    loop {
        match recv_latest_frame(&frame_rx, FRAME_WAIT) {
            Ok(frame) => {
                let composited = pipeline.process(frame);
                if composited.placement.is_some() != tracking {
                    tracking = composited.placement.is_some();
                    match composited.placement {
                        Some(placement) => log::debug!("body found, garment at {placement:?}"),
                        None => log::debug!("body lost"),
                    }
                }
                if window.is_none() {
                    window = Some(DisplayWindow::open(&composited.frame)?);
                }
                if let Some(view) = window.as_mut() {
                    view.show(&composited.frame)?;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(view) = window.as_mut() {
                    view.poll();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("camera channel closed, leaving display");
                return Ok(());
            }
        }

        let Some(view) = window.as_mut() else {
            continue;
        };
        if !view.window.is_open() {
            return Ok(());
        }

        let wanted = window_title(pipeline.garments().current_file());
        if wanted != title {
            view.window.set_title(&wanted);
            title = wanted;
        }

        for key in view.window.get_keys_pressed(KeyRepeat::No) {
            match nav_action(key) {
                Some(NavAction::Quit) => return Ok(()),
                Some(NavAction::Previous) => {
                    pipeline.garments().previous();
                }
                Some(NavAction::Next) => {
                    pipeline.garments().next();
                }
                None => {}
            }
        }
    }
}
