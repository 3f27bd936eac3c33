use crate::{
    bus::{Bus, CpuBus},
    cartridge::Cartridge,
    cpu::Cpu,
    ppu::Ppu,
    InputPort, Mem, PixelSink,
};

/// The whole console: CPU, PPU and bus as owned state blocks, driven in
/// lock-step by [`Machine::tick`] at one CPU cycle to three PPU dots.
pub struct Machine<S: PixelSink, I: InputPort> {
    pub cpu: Cpu,
    pub ppu: Ppu,
    pub bus: Bus,
    sink: S,
    input: I,
    /// Cycles left in the instruction currently being billed.
    cycle_budget: u16,
    odd_cycle: bool,
    ticks: u64,
}

impl<S: PixelSink, I: InputPort> Machine<S, I> {
    /// Powers the console on with the given cartridge; the RESET line is
    /// latched so the first serviced interrupt loads the reset vector.
    pub fn new(cartridge: Cartridge, sink: S, input: I) -> Self {
        let Cartridge {
            prg,
            chr,
            chr_writable,
            mirroring,
        } = cartridge;
        let mut cpu = Cpu::new();
        cpu.raise_reset();
        Machine {
            cpu,
            ppu: Ppu::new(chr, chr_writable, mirroring),
            bus: Bus::new(prg),
            sink,
            input,
            cycle_budget: 0,
            odd_cycle: false,
            ticks: 0,
        }
    }

    /// One master tick. The CPU consumes at most one cycle of its budget
    /// (starting a new instruction when the budget is empty), then the PPU
    /// advances three dots. Fails only on an undecodable opcode.
    pub fn tick(&mut self) -> Result<(), String> {
        if self.cycle_budget == 0 && !self.cpu.halted {
            let cost = {
                let mut view = CpuBus {
                    bus: &mut self.bus,
                    ppu: &mut self.ppu,
                    input: &mut self.input,
                };
                self.cpu.step(&mut view)?
            };
            self.cycle_budget = cost;

            // A latched aperture write commits 3*cycles - 2 dots from now,
            // inside this instruction's own dot span.
            if let Some((reg, val)) = self.bus.deferred_reg_write.take() {
                let dots = (3 * self.cycle_budget as u32).saturating_sub(2);
                self.ppu.schedule_register_write(reg, val, dots);
            }

            if let Some(page) = self.bus.dma_page.take() {
                self.run_oam_dma(page);
                // 513 cycles, one more when triggered on an odd cycle.
                self.cycle_budget += 513 + self.odd_cycle as u16;
            }
        }

        if self.cycle_budget > 0 {
            self.cycle_budget -= 1;
            self.odd_cycle = !self.odd_cycle;
        }

        for _ in 0..3 {
            if self.ppu.step_dot(&mut self.sink) {
                self.cpu.raise_nmi();
            }
        }

        self.ticks += 1;
        Ok(())
    }

    /// Copies one 256-byte CPU page into OAM through the sprite-field
    /// dispatcher, starting at the current OAM address.
    fn run_oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        for i in 0..256 {
            let val = {
                let mut view = CpuBus {
                    bus: &mut self.bus,
                    ppu: &mut self.ppu,
                    input: &mut self.input,
                };
                view.read_u8(base + i)
            };
            self.ppu.oam_write(val);
        }
    }

    pub fn halt(&mut self) {
        self.cpu.halted = true;
    }

    pub fn resume(&mut self) {
        self.cpu.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.cpu.halted
    }

    pub fn reset(&mut self) {
        self.cpu.raise_reset();
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn cycles_remaining(&self) -> u16 {
        self.cycle_budget
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn input_mut(&mut self) -> &mut I {
        &mut self.input
    }
}
