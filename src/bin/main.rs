use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use famicore::{Cartridge, InputPort, Machine, PixelSink};
use sdl2::{event::Event, keyboard::Keycode, pixels::PixelFormatEnum};

const WIDTH: usize = 256;
const HEIGHT: usize = 240;
const SCALE: f32 = 3.0;
const FRAME_DURATION: Duration = Duration::from_micros(16_639);

// The stock 2C02 color set, indexed by the 6-bit values the core emits.
#[rustfmt::skip]
const SYSTEM_PALETTE: [(u8, u8, u8); 64] = [
    (0x80, 0x80, 0x80), (0x00, 0x3D, 0xA6), (0x00, 0x12, 0xB0), (0x44, 0x00, 0x96),
    (0xA1, 0x00, 0x5E), (0xC7, 0x00, 0x28), (0xBA, 0x06, 0x00), (0x8C, 0x17, 0x00),
    (0x5C, 0x2F, 0x00), (0x10, 0x45, 0x00), (0x05, 0x4A, 0x00), (0x00, 0x47, 0x2E),
    (0x00, 0x41, 0x66), (0x00, 0x00, 0x00), (0x05, 0x05, 0x05), (0x05, 0x05, 0x05),
    (0xC7, 0xC7, 0xC7), (0x00, 0x77, 0xFF), (0x21, 0x55, 0xFF), (0x82, 0x37, 0xFA),
    (0xEB, 0x2F, 0xB5), (0xFF, 0x29, 0x50), (0xFF, 0x22, 0x00), (0xD6, 0x32, 0x00),
    (0xC4, 0x62, 0x00), (0x35, 0x80, 0x00), (0x05, 0x8F, 0x00), (0x00, 0x8A, 0x55),
    (0x00, 0x99, 0xCC), (0x21, 0x21, 0x21), (0x09, 0x09, 0x09), (0x09, 0x09, 0x09),
    (0xFF, 0xFF, 0xFF), (0x0F, 0xD7, 0xFF), (0x69, 0xA2, 0xFF), (0xD4, 0x80, 0xFF),
    (0xFF, 0x45, 0xF3), (0xFF, 0x61, 0x8B), (0xFF, 0x88, 0x33), (0xFF, 0x9C, 0x12),
    (0xFA, 0xBC, 0x20), (0x9F, 0xE3, 0x0E), (0x2B, 0xF0, 0x35), (0x0C, 0xF0, 0xA4),
    (0x05, 0xFB, 0xFF), (0x5E, 0x5E, 0x5E), (0x0D, 0x0D, 0x0D), (0x0D, 0x0D, 0x0D),
    (0xFF, 0xFF, 0xFF), (0xA6, 0xFC, 0xFF), (0xB3, 0xEC, 0xFF), (0xDA, 0xAB, 0xEB),
    (0xFF, 0xA8, 0xF9), (0xFF, 0xAB, 0xB3), (0xFF, 0xD2, 0xB0), (0xFF, 0xEF, 0xA6),
    (0xFF, 0xF7, 0x9C), (0xD7, 0xE8, 0x95), (0xA6, 0xED, 0xAF), (0xA2, 0xF2, 0xDA),
    (0x99, 0xFF, 0xFC), (0xDD, 0xDD, 0xDD), (0x11, 0x11, 0x11), (0x11, 0x11, 0x11),
];

/// Accumulates one frame of RGB24 pixels; `ready` flips when the core
/// commits a frame.
struct FrameSink {
    frame: Vec<u8>,
    cursor: usize,
    ready: bool,
}

impl FrameSink {
    fn new() -> Self {
        FrameSink {
            frame: vec![0; WIDTH * HEIGHT * 3],
            cursor: 0,
            ready: false,
        }
    }
}

impl PixelSink for FrameSink {
    fn send_pixel(&mut self, color: u8) {
        let (r, g, b) = SYSTEM_PALETTE[(color & 0x3F) as usize];
        if self.cursor + 2 < self.frame.len() {
            self.frame[self.cursor] = r;
            self.frame[self.cursor + 1] = g;
            self.frame[self.cursor + 2] = b;
        }
        self.cursor += 3;
    }

    fn end_frame(&mut self) {
        self.ready = true;
        self.cursor = 0;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy)]
    struct Buttons: u8 {
        const A      = 0b0000_0001;
        const B      = 0b0000_0010;
        const SELECT = 0b0000_0100;
        const START  = 0b0000_1000;
        const UP     = 0b0001_0000;
        const DOWN   = 0b0010_0000;
        const LEFT   = 0b0100_0000;
        const RIGHT  = 0b1000_0000;
    }
}

/// Standard controller shift register behind $4016.
struct Controller {
    strobe: bool,
    index: u8,
    buttons: Buttons,
}

impl Controller {
    fn new() -> Self {
        Controller {
            strobe: false,
            index: 0,
            buttons: Buttons::empty(),
        }
    }

    fn set_button(&mut self, button: Buttons, pressed: bool) {
        self.buttons.set(button, pressed);
    }
}

impl InputPort for Controller {
    fn write(&mut self, val: u8) {
        self.strobe = val & 1 != 0;
        if self.strobe {
            self.index = 0;
        }
    }

    fn read(&mut self) -> u8 {
        if self.index > 7 {
            return 1;
        }
        let bit = (self.buttons.bits() >> self.index) & 1;
        if !self.strobe {
            self.index += 1;
        }
        bit
    }
}

fn main() -> Result<(), String> {
    let rom_path = std::env::args()
        .nth(1)
        .ok_or("usage: famicore <rom.nes>")?;

    let mut key_map = HashMap::new();
    key_map.insert(Keycode::Down, Buttons::DOWN);
    key_map.insert(Keycode::Up, Buttons::UP);
    key_map.insert(Keycode::Right, Buttons::RIGHT);
    key_map.insert(Keycode::Left, Buttons::LEFT);
    key_map.insert(Keycode::Space, Buttons::SELECT);
    key_map.insert(Keycode::Return, Buttons::START);
    key_map.insert(Keycode::Z, Buttons::A);
    key_map.insert(Keycode::X, Buttons::B);

    let sdl_context = sdl2::init()?;
    let video_subsystem = sdl_context.video()?;
    let window = video_subsystem
        .window(
            "famicore",
            (WIDTH as f32 * SCALE) as u32,
            (HEIGHT as f32 * SCALE) as u32,
        )
        .position_centered()
        .build()
        .map_err(|e| e.to_string())?;

    let mut canvas = window.into_canvas().build().map_err(|e| e.to_string())?;
    let mut event_pump = sdl_context.event_pump()?;
    canvas.set_scale(SCALE, SCALE)?;

    let creator = canvas.texture_creator();
    let mut texture = creator
        .create_texture_target(PixelFormatEnum::RGB24, WIDTH as u32, HEIGHT as u32)
        .map_err(|e| e.to_string())?;

    let bytes = std::fs::read(&rom_path).map_err(|e| e.to_string())?;
    let cartridge = Cartridge::from_bytes(&bytes)?;
    let mut machine = Machine::new(cartridge, FrameSink::new(), Controller::new());

    let mut next_frame_target = Instant::now();
    loop {
        machine.tick()?;
        if !machine.sink_mut().ready {
            continue;
        }
        machine.sink_mut().ready = false;

        texture
            .update(None, &machine.sink_mut().frame, WIDTH * 3)
            .map_err(|e| e.to_string())?;
        canvas.copy(&texture, None, None)?;
        canvas.present();

        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => return Ok(()),
                Event::KeyDown {
                    keycode: Some(key), ..
                } => {
                    if let Some(&button) = key_map.get(&key) {
                        machine.input_mut().set_button(button, true);
                    }
                }
                Event::KeyUp {
                    keycode: Some(key), ..
                } => {
                    if let Some(&button) = key_map.get(&key) {
                        machine.input_mut().set_button(button, false);
                    }
                }
                _ => {}
            }
        }

        next_frame_target += FRAME_DURATION;
        let now = Instant::now();
        if next_frame_target > now {
            std::thread::sleep(next_frame_target - now);
        } else {
            next_frame_target = now;
        }
    }
}
