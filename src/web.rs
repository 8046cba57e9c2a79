//! Web-specific bindings.
//!
//! The instruction decoder lives on the JavaScript side of the boundary (§1's excluded
//! collaborator). This module exposes the rest of the machine as `wasm_bindgen` calls, and adapts
//! the imported decoder function to this crate's [`crate::cpu::Z80Core`] contract so
//! [`crate::driver::ExecutionDriver`] can drive it exactly as it drives a native core.
//!
//! `wasm_bindgen` extern imports can only cross the boundary with primitives, strings, or
//! `#[wasm_bindgen]`-exported structs — not trait objects — so memory cannot be handed to the
//! decoder as a single `&mut dyn Memory` argument. Instead [`JsCore::execute_one`] copies the
//! decoder's addressable window into a flat buffer before the call and writes any changes back
//! after, which the decoder reports via the sparse write list in [`StepResult`].

use wasm_bindgen::prelude::*;

use crate::cpu::{CpuMode, StepOutcome, Z80Core};
use crate::memory::Memory;
use crate::Emulator;

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    console_log::init().unwrap();
}

/// Bytes of surrounding memory handed to the decoder on each step, centered so that most
/// instructions (at most a handful of operand bytes past the opcode) stay within the window.
const WINDOW_SIZE: usize = 32;

/// The register file plus a window of memory around `pc`, passed by reference so the decoder can
/// read it without a separate round trip.
#[wasm_bindgen]
#[derive(Debug, Default, Clone)]
pub struct RegisterSnapshot {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    window: Vec<u8>,
}

#[wasm_bindgen]
impl RegisterSnapshot {
    /// Returns the memory window starting at `pc`, for the decoder to read operand bytes from.
    pub fn window(&self) -> Vec<u8> {
        self.window.clone()
    }
}

/// What the decoder reports back after executing one instruction: any bytes it wrote, and whether
/// it hit `HALT` or an opcode it couldn't decode.
#[wasm_bindgen]
#[derive(Debug, Default, Clone)]
pub struct StepResult {
    pub new_pc: u16,
    pub new_sp: u16,
    pub new_a: u8,
    pub new_b: u8,
    pub new_c: u8,
    pub new_d: u8,
    pub new_e: u8,
    pub new_h: u8,
    pub new_l: u8,
    pub halted: bool,
    pub unimplemented_opcode: i32,
    write_addresses: Vec<u16>,
    write_values: Vec<u8>,
}

#[wasm_bindgen]
impl StepResult {
    pub fn writes(&self) -> u32 {
        self.write_addresses.len() as u32
    }
}

#[wasm_bindgen]
extern "C" {
    /// Decodes and executes exactly one instruction, given the current register snapshot.
    /// Implemented on the JavaScript side.
    #[wasm_bindgen(js_namespace = wbwCore)]
    fn stepOne(regs: &RegisterSnapshot) -> StepResult;
}

/// Adapts [`RegisterSnapshot`]/[`StepResult`] plus the imported `stepOne` binding to [`Z80Core`].
struct JsCore {
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    h: u8,
    l: u8,
    pc: u16,
    sp: u16,
    mode: CpuMode,
}

impl JsCore {
    fn new() -> Self {
        JsCore {
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            pc: 0,
            sp: 0,
            mode: CpuMode::Z80,
        }
    }
}

impl Z80Core for JsCore {
    fn get_a(&self) -> u8 {
        self.a
    }
    fn set_a(&mut self, value: u8) {
        self.a = value;
    }
    fn get_b(&self) -> u8 {
        self.b
    }
    fn set_b(&mut self, value: u8) {
        self.b = value;
    }
    fn get_c(&self) -> u8 {
        self.c
    }
    fn set_c(&mut self, value: u8) {
        self.c = value;
    }
    fn get_d(&self) -> u8 {
        self.d
    }
    fn set_d(&mut self, value: u8) {
        self.d = value;
    }
    fn get_e(&self) -> u8 {
        self.e
    }
    fn set_e(&mut self, value: u8) {
        self.e = value;
    }
    fn get_h(&self) -> u8 {
        self.h
    }
    fn set_h(&mut self, value: u8) {
        self.h = value;
    }
    fn get_l(&self) -> u8 {
        self.l
    }
    fn set_l(&mut self, value: u8) {
        self.l = value;
    }
    fn get_pc(&self) -> u16 {
        self.pc
    }
    fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }
    fn get_sp(&self) -> u16 {
        self.sp
    }
    fn set_sp(&mut self, value: u16) {
        self.sp = value;
    }
    fn set_mode(&mut self, mode: CpuMode) {
        self.mode = mode;
    }
    fn mode(&self) -> CpuMode {
        self.mode
    }

    fn execute_one(&mut self, memory: &mut dyn Memory) -> StepOutcome {
        let window = (0..WINDOW_SIZE as u16)
            .map(|offset| memory.fetch(self.pc.wrapping_add(offset)))
            .collect();

        let snapshot = RegisterSnapshot {
            a: self.a,
            b: self.b,
            c: self.c,
            d: self.d,
            e: self.e,
            h: self.h,
            l: self.l,
            pc: self.pc,
            sp: self.sp,
            window,
        };

        let result = stepOne(&snapshot);

        for (addr, value) in result
            .write_addresses
            .iter()
            .zip(result.write_values.iter())
        {
            memory.store(*addr, *value);
        }

        self.a = result.new_a;
        self.b = result.new_b;
        self.c = result.new_c;
        self.d = result.new_d;
        self.e = result.new_e;
        self.h = result.new_h;
        self.l = result.new_l;
        self.pc = result.new_pc;
        self.sp = result.new_sp;

        if result.halted {
            StepOutcome::Halted
        } else if result.unimplemented_opcode >= 0 {
            StepOutcome::UnimplementedOpcode(result.unimplemented_opcode as u8)
        } else {
            StepOutcome::Normal
        }
    }
}

/// The `wasm_bindgen`-exported emulator handle.
#[wasm_bindgen]
pub struct WasmEmulator {
    emulator: Emulator,
    core: JsCore,
}

#[wasm_bindgen]
impl WasmEmulator {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmEmulator {
        WasmEmulator {
            emulator: Emulator::builder().with_blocking_allowed(false).build(),
            core: JsCore::new(),
        }
    }

    pub fn load_rom(&mut self, image: &[u8]) {
        self.emulator.load_rom(image);
    }

    pub fn load_disk(&mut self, unit: u32, image: Vec<u8>) -> Result<(), JsValue> {
        self.emulator
            .load_disk(unit as usize, image)
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    pub fn queue_input(&mut self, byte: u8) {
        self.emulator.queue_input(byte);
    }

    pub fn drain_output(&mut self) -> Vec<u8> {
        self.emulator.drain_output()
    }

    pub fn is_halted(&self) -> bool {
        self.emulator.is_halted()
    }

    pub fn resume(&mut self) {
        self.emulator.resume()
    }

    pub fn run_batch(&mut self) {
        self.emulator.run_batch(&mut self.core);
    }
}

impl Default for WasmEmulator {
    fn default() -> Self {
        WasmEmulator::new()
    }
}
