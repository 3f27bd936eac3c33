use bitflags::bitflags;

use crate::{
    opcodes::{AddressMode, Op, OpFamily::*, OPS},
    utils, Mem,
};

const STACK_BASE: u16 = 0x100;
const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// Cycles billed for acknowledging any interrupt.
pub const INTERRUPT_CYCLES: u16 = 6;

bitflags! {
    // 7  bit  0
    // ---- ----
    // NV1B DIZC
    // |||| ||||
    // |||| |||+- Carry
    // |||| ||+-- Zero
    // |||| |+--- Interrupt Disable
    // |||| +---- Decimal (stored, never honored by the ALU)
    // |||+------ (No CPU effect; see: the B flag)
    // ||+------- (No CPU effect; always pushed as 1)
    // |+-------- Overflow
    // +--------- Negative
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuFlags: u8 {
        const CARRY        = 0b00000001;
        const ZERO         = 0b00000010;
        const INTR_DISABLE = 0b00000100;
        const DECIMAL      = 0b00001000;
        const BREAK        = 0b00010000;
        const BREAK2       = 0b00100000;
        const OVERFLOW     = 0b01000000;
        const NEGATIVE     = 0b10000000;
    }
}

/// Where an instruction's operand lives once its addressing mode resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveAddress {
    Implied,
    Accumulator,
    Memory(u16),
}

/// Result of resolving an addressing mode: the operand location plus the
/// extra cycles the instruction pays on top of its base cost, depending on
/// whether it reads (`r_cyc`) or writes (`w_cyc`) through the address.
#[derive(Debug, Clone, Copy)]
pub struct ModeResult {
    pub arg: EffectiveAddress,
    pub r_cyc: u16,
    pub w_cyc: u16,
}

pub struct Cpu {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub status: CpuFlags,
    pub halted: bool,
    pub step_count: u64,
    nmi_pending: bool,
    reset_pending: bool,
    irq_pending: bool,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            status: CpuFlags::from_bits_retain(0x34),
            halted: false,
            step_count: 0,
            nmi_pending: false,
            reset_pending: false,
            irq_pending: false,
        }
    }

    /// Latches the NMI line; cleared when the interrupt is acknowledged.
    pub fn raise_nmi(&mut self) {
        self.nmi_pending = true;
    }

    pub fn raise_irq(&mut self) {
        self.irq_pending = true;
    }

    pub fn raise_reset(&mut self) {
        self.reset_pending = true;
    }

    fn interrupt_pending(&self) -> bool {
        self.nmi_pending
            || self.reset_pending
            || (self.irq_pending && !self.status.contains(CpuFlags::INTR_DISABLE))
    }

    /// Services a pending interrupt or executes one instruction, returning
    /// the number of cycles to bill. Fails only on an undecodable opcode.
    pub fn step(&mut self, bus: &mut impl Mem) -> Result<u16, String> {
        if self.interrupt_pending() {
            self.service_interrupt(bus);
            return Ok(INTERRUPT_CYCLES);
        }

        let code = bus.read_u8(self.pc);
        let op = OPS[code as usize]
            .ok_or_else(|| format!("unknown opcode {:#04x} at {:#06x}", code, self.pc))?;
        self.pc = self.pc.wrapping_add(1);
        let cycles = self.run_op(bus, op);
        self.step_count += 1;
        Ok(cycles)
    }

    /// NMI wins over RESET, RESET over IRQ. RESET loads its vector without
    /// touching the stack.
    fn service_interrupt(&mut self, bus: &mut impl Mem) {
        if self.nmi_pending {
            self.nmi_pending = false;
            self.push_addr(bus, self.pc);
            self.push_stack(bus, self.status_for_interrupt());
            self.status.insert(CpuFlags::INTR_DISABLE);
            self.pc = bus.read_u16(NMI_VECTOR);
        } else if self.reset_pending {
            self.reset_pending = false;
            self.status.insert(CpuFlags::INTR_DISABLE);
            self.pc = bus.read_u16(RESET_VECTOR);
        } else {
            self.irq_pending = false;
            self.push_addr(bus, self.pc);
            self.push_stack(bus, self.status_for_interrupt());
            self.status.insert(CpuFlags::INTR_DISABLE);
            self.pc = bus.read_u16(IRQ_VECTOR);
        }
    }

    // Hardware interrupts push with bit 5 set and bit 4 clear.
    fn status_for_interrupt(&self) -> u8 {
        let mut pushed = self.status;
        pushed.insert(CpuFlags::BREAK2);
        pushed.remove(CpuFlags::BREAK);
        pushed.bits()
    }

    fn resolve_mode(&mut self, bus: &mut impl Mem, mode: AddressMode) -> ModeResult {
        use AddressMode::*;
        use EffectiveAddress::*;
        match mode {
            IMP => ModeResult {
                arg: Implied,
                r_cyc: 0,
                w_cyc: 0,
            },
            ACC => ModeResult {
                arg: Accumulator,
                r_cyc: 0,
                w_cyc: 0,
            },
            IMM | REL => {
                let arg = Memory(self.pc);
                self.pc = self.pc.wrapping_add(1);
                ModeResult {
                    arg,
                    r_cyc: 0,
                    w_cyc: 0,
                }
            }
            ZP => {
                let addr = bus.read_u8(self.pc) as u16;
                self.pc = self.pc.wrapping_add(1);
                ModeResult {
                    arg: Memory(addr),
                    r_cyc: 1,
                    w_cyc: 1,
                }
            }
            ZPX => {
                let addr = bus.read_u8(self.pc).wrapping_add(self.x) as u16;
                self.pc = self.pc.wrapping_add(1);
                ModeResult {
                    arg: Memory(addr),
                    r_cyc: 2,
                    w_cyc: 2,
                }
            }
            ZPY => {
                let addr = bus.read_u8(self.pc).wrapping_add(self.y) as u16;
                self.pc = self.pc.wrapping_add(1);
                ModeResult {
                    arg: Memory(addr),
                    r_cyc: 2,
                    w_cyc: 2,
                }
            }
            ABS => {
                let addr = bus.read_u16(self.pc);
                self.pc = self.pc.wrapping_add(2);
                ModeResult {
                    arg: Memory(addr),
                    r_cyc: 2,
                    w_cyc: 2,
                }
            }
            ABSX => self.indexed_absolute(bus, self.x),
            ABSY => self.indexed_absolute(bus, self.y),
            IND => {
                let ptr = bus.read_u16(self.pc);
                self.pc = self.pc.wrapping_add(2);
                ModeResult {
                    arg: Memory(bus.read_u16(ptr)),
                    r_cyc: 4,
                    w_cyc: 0,
                }
            }
            INDX => {
                let ptr = bus.read_u8(self.pc).wrapping_add(self.x);
                self.pc = self.pc.wrapping_add(1);
                ModeResult {
                    arg: Memory(bus.read_u16(ptr as u16)),
                    r_cyc: 4,
                    w_cyc: 4,
                }
            }
            INDY => {
                let ptr = bus.read_u8(self.pc);
                self.pc = self.pc.wrapping_add(1);
                let lo = bus.read_u8(ptr as u16);
                let hi = bus.read_u8(ptr.wrapping_add(1) as u16);
                let (lo, crossed) = lo.overflowing_add(self.y);
                let hi = hi.wrapping_add(crossed as u8);
                ModeResult {
                    arg: Memory(u16::from_le_bytes([lo, hi])),
                    r_cyc: 3 + crossed as u16,
                    w_cyc: 4,
                }
            }
        }
    }

    // Reads pay the extra cycle only when indexing carries into the high
    // byte; writes always pay the fixed higher cost.
    fn indexed_absolute(&mut self, bus: &mut impl Mem, index: u8) -> ModeResult {
        let lo = bus.read_u8(self.pc);
        let hi = bus.read_u8(self.pc.wrapping_add(1));
        self.pc = self.pc.wrapping_add(2);
        let (lo, crossed) = lo.overflowing_add(index);
        let hi = hi.wrapping_add(crossed as u8);
        ModeResult {
            arg: EffectiveAddress::Memory(u16::from_le_bytes([lo, hi])),
            r_cyc: 2 + crossed as u16,
            w_cyc: 3,
        }
    }

    fn run_op(&mut self, bus: &mut impl Mem, op: Op) -> u16 {
        let m = self.resolve_mode(bus, op.mode);
        match op.family {
            ADC => {
                let val = self.read_operand(bus, m.arg);
                self.add_with_carry(val);
                2 + m.r_cyc
            }
            AND => {
                let val = self.read_operand(bus, m.arg);
                self.set_a(self.a & val);
                2 + m.r_cyc
            }
            ASL => {
                let val = self.read_operand(bus, m.arg);
                self.status.set(CpuFlags::CARRY, val & 0x80 != 0);
                self.write_operand_nz(bus, m.arg, val << 1);
                self.rmw_cycles(m)
            }
            BCC => self.branch_if(bus, m.arg, !self.status.contains(CpuFlags::CARRY)),
            BCS => self.branch_if(bus, m.arg, self.status.contains(CpuFlags::CARRY)),
            BEQ => self.branch_if(bus, m.arg, self.status.contains(CpuFlags::ZERO)),
            BIT => {
                let val = self.read_operand(bus, m.arg);
                self.status.set(CpuFlags::ZERO, self.a & val == 0);
                self.status.set(CpuFlags::OVERFLOW, val & 0x40 != 0);
                self.status.set(CpuFlags::NEGATIVE, val & 0x80 != 0);
                2 + m.r_cyc
            }
            BMI => self.branch_if(bus, m.arg, self.status.contains(CpuFlags::NEGATIVE)),
            BNE => self.branch_if(bus, m.arg, !self.status.contains(CpuFlags::ZERO)),
            BPL => self.branch_if(bus, m.arg, !self.status.contains(CpuFlags::NEGATIVE)),
            BRK => {
                self.push_addr(bus, self.pc.wrapping_add(1));
                self.push_stack(bus, (self.status | CpuFlags::BREAK | CpuFlags::BREAK2).bits());
                self.pc = bus.read_u16(IRQ_VECTOR);
                self.status.insert(CpuFlags::BREAK);
                self.status.insert(CpuFlags::INTR_DISABLE);
                7
            }
            BVC => self.branch_if(bus, m.arg, !self.status.contains(CpuFlags::OVERFLOW)),
            BVS => self.branch_if(bus, m.arg, self.status.contains(CpuFlags::OVERFLOW)),
            CLC => {
                self.status.remove(CpuFlags::CARRY);
                2
            }
            CLD => {
                self.status.remove(CpuFlags::DECIMAL);
                2
            }
            CLI => {
                self.status.remove(CpuFlags::INTR_DISABLE);
                2
            }
            CLV => {
                self.status.remove(CpuFlags::OVERFLOW);
                2
            }
            CMP => {
                self.compare(bus, m.arg, self.a);
                2 + m.r_cyc
            }
            CPX => {
                self.compare(bus, m.arg, self.x);
                2 + m.r_cyc
            }
            CPY => {
                self.compare(bus, m.arg, self.y);
                2 + m.r_cyc
            }
            DEC => {
                let val = self.read_operand(bus, m.arg).wrapping_sub(1);
                self.write_operand_nz(bus, m.arg, val);
                4 + m.w_cyc
            }
            DEX => {
                self.set_x(self.x.wrapping_sub(1));
                2
            }
            DEY => {
                self.set_y(self.y.wrapping_sub(1));
                2
            }
            EOR => {
                let val = self.read_operand(bus, m.arg);
                self.set_a(self.a ^ val);
                2 + m.r_cyc
            }
            INC => {
                let val = self.read_operand(bus, m.arg).wrapping_add(1);
                self.write_operand_nz(bus, m.arg, val);
                4 + m.w_cyc
            }
            INX => {
                self.set_x(self.x.wrapping_add(1));
                2
            }
            INY => {
                self.set_y(self.y.wrapping_add(1));
                2
            }
            JMP => {
                let EffectiveAddress::Memory(target) = m.arg else {
                    unreachable!("JMP is always absolute or indirect");
                };
                self.pc = target;
                1 + m.r_cyc
            }
            JSR => {
                let EffectiveAddress::Memory(target) = m.arg else {
                    unreachable!("JSR is always absolute");
                };
                self.push_addr(bus, self.pc.wrapping_sub(1));
                self.pc = target;
                4 + m.r_cyc
            }
            LDA => {
                let val = self.read_operand(bus, m.arg);
                self.set_a(val);
                2 + m.r_cyc
            }
            LDX => {
                let val = self.read_operand(bus, m.arg);
                self.set_x(val);
                2 + m.r_cyc
            }
            LDY => {
                let val = self.read_operand(bus, m.arg);
                self.set_y(val);
                2 + m.r_cyc
            }
            LSR => {
                let val = self.read_operand(bus, m.arg);
                self.status.set(CpuFlags::CARRY, val & 0x01 != 0);
                self.write_operand_nz(bus, m.arg, val >> 1);
                self.rmw_cycles(m)
            }
            NOP => 2 + m.r_cyc,
            ORA => {
                let val = self.read_operand(bus, m.arg);
                self.set_a(self.a | val);
                2 + m.r_cyc
            }
            PHA => {
                self.push_stack(bus, self.a);
                3
            }
            PHP => {
                self.push_stack(bus, (self.status | CpuFlags::BREAK | CpuFlags::BREAK2).bits());
                3
            }
            PLA => {
                let val = self.pop_stack(bus);
                self.set_a(val);
                4
            }
            PLP => {
                self.status = CpuFlags::from_bits_retain(self.pop_stack(bus));
                4
            }
            ROL => {
                let ocar = self.status.contains(CpuFlags::CARRY);
                let val = self.read_operand(bus, m.arg);
                let (res, car) = utils::rol(val, ocar);
                self.status.set(CpuFlags::CARRY, car);
                self.write_operand_nz(bus, m.arg, res);
                self.rmw_cycles(m)
            }
            ROR => {
                let ocar = self.status.contains(CpuFlags::CARRY);
                let val = self.read_operand(bus, m.arg);
                let (res, car) = utils::ror(val, ocar);
                self.status.set(CpuFlags::CARRY, car);
                self.write_operand_nz(bus, m.arg, res);
                self.rmw_cycles(m)
            }
            RTI => {
                self.status = CpuFlags::from_bits_retain(self.pop_stack(bus));
                self.pc = self.pop_addr(bus);
                6
            }
            RTS => {
                self.pc = self.pop_addr(bus).wrapping_add(1);
                6
            }
            SBC => {
                let val = self.read_operand(bus, m.arg);
                self.subtract_with_borrow(val);
                2 + m.r_cyc
            }
            SEC => {
                self.status.insert(CpuFlags::CARRY);
                2
            }
            SED => {
                self.status.insert(CpuFlags::DECIMAL);
                2
            }
            SEI => {
                self.status.insert(CpuFlags::INTR_DISABLE);
                2
            }
            STA => {
                self.write_operand(bus, m.arg, self.a);
                2 + m.w_cyc
            }
            STX => {
                self.write_operand(bus, m.arg, self.x);
                2 + m.w_cyc
            }
            STY => {
                self.write_operand(bus, m.arg, self.y);
                2 + m.w_cyc
            }
            TAX => {
                self.set_x(self.a);
                2
            }
            TAY => {
                self.set_y(self.a);
                2
            }
            TSX => {
                self.set_x(self.sp);
                2
            }
            TXA => {
                self.set_a(self.x);
                2
            }
            TXS => {
                self.sp = self.x;
                2
            }
            TYA => {
                self.set_a(self.y);
                2
            }
            ISC => {
                // Increment memory, then subtract the incremented value.
                let val = self.read_operand(bus, m.arg).wrapping_add(1);
                self.write_operand_nz(bus, m.arg, val);
                self.subtract_with_borrow(val);
                4 + m.w_cyc
            }
        }
    }

    fn add_with_carry(&mut self, operand: u8) {
        let carry_in = self.status.contains(CpuFlags::CARRY);
        // 9-bit adjusted operand: carry folds in before the signed analysis.
        let v = operand as u16 + carry_in as u16;
        let a = self.a;
        let sum = a as u16 + v;
        self.set_a(sum as u8);
        let a7 = a & 0x80 != 0;
        let b7 = v & 0x80 != 0;
        let r7 = self.a & 0x80 != 0;
        let overflow = if carry_in && v == 0x80 {
            !a7
        } else {
            a7 == b7 && a7 != r7
        };
        self.status.set(CpuFlags::OVERFLOW, overflow);
        self.status.set(CpuFlags::CARRY, sum >= 0x100);
    }

    fn subtract_with_borrow(&mut self, operand: u8) {
        let borrow = !self.status.contains(CpuFlags::CARRY);
        let v = operand as u16 + borrow as u16;
        let a = self.a;
        let diff = (a as u32).wrapping_sub(v as u32);
        self.set_a(diff as u8);
        let a7 = a & 0x80 != 0;
        let b7 = v & 0x80 != 0;
        let r7 = self.a & 0x80 != 0;
        let overflow = if borrow && v == 0x80 {
            a7
        } else {
            a7 != b7 && b7 == r7
        };
        self.status.set(CpuFlags::OVERFLOW, overflow);
        self.status.set(CpuFlags::CARRY, diff < 0x100);
    }

    fn compare(&mut self, bus: &mut impl Mem, arg: EffectiveAddress, reg: u8) {
        let val = self.read_operand(bus, arg);
        self.status.set(CpuFlags::CARRY, reg >= val);
        self.update_nz(reg.wrapping_sub(val));
    }

    /// 2 not taken, 3 taken, 4 when the target sits on another page than the
    /// instruction that follows the branch.
    fn branch_if(&mut self, bus: &mut impl Mem, arg: EffectiveAddress, cond: bool) -> u16 {
        let mut cycles = 2;
        if cond {
            cycles += 1;
            let ofs = self.read_operand(bus, arg);
            let old_page = self.pc >> 8;
            self.pc = utils::add_signed_offset(self.pc, ofs);
            if self.pc >> 8 != old_page {
                cycles += 1;
            }
        }
        cycles
    }

    fn rmw_cycles(&self, m: ModeResult) -> u16 {
        if m.arg == EffectiveAddress::Accumulator {
            2
        } else {
            4 + m.w_cyc
        }
    }

    fn read_operand(&mut self, bus: &mut impl Mem, arg: EffectiveAddress) -> u8 {
        match arg {
            EffectiveAddress::Implied => 0,
            EffectiveAddress::Accumulator => self.a,
            EffectiveAddress::Memory(addr) => bus.read_u8(addr),
        }
    }

    fn write_operand(&mut self, bus: &mut impl Mem, arg: EffectiveAddress, val: u8) {
        match arg {
            EffectiveAddress::Implied => {}
            EffectiveAddress::Accumulator => self.a = val,
            EffectiveAddress::Memory(addr) => bus.write_u8(addr, val),
        }
    }

    fn write_operand_nz(&mut self, bus: &mut impl Mem, arg: EffectiveAddress, val: u8) {
        self.write_operand(bus, arg, val);
        self.update_nz(val);
    }

    fn set_a(&mut self, val: u8) {
        self.a = val;
        self.update_nz(val);
    }

    fn set_x(&mut self, val: u8) {
        self.x = val;
        self.update_nz(val);
    }

    fn set_y(&mut self, val: u8) {
        self.y = val;
        self.update_nz(val);
    }

    fn update_nz(&mut self, val: u8) {
        self.status.set(CpuFlags::ZERO, val == 0);
        self.status.set(CpuFlags::NEGATIVE, val & 0x80 != 0);
    }

    fn push_stack(&mut self, bus: &mut impl Mem, val: u8) {
        bus.write_u8(STACK_BASE + self.sp as u16, val);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pop_stack(&mut self, bus: &mut impl Mem) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read_u8(STACK_BASE + self.sp as u16)
    }

    fn push_addr(&mut self, bus: &mut impl Mem, addr: u16) {
        let bytes = addr.to_le_bytes();
        self.push_stack(bus, bytes[1]);
        self.push_stack(bus, bytes[0]);
    }

    fn pop_addr(&mut self, bus: &mut impl Mem) -> u16 {
        u16::from_le_bytes([self.pop_stack(bus), self.pop_stack(bus)])
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Cpu::new()
    }
}
