use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Write};

use crate::bytecode::image::Image;
use crate::bytecode::op::Opcode;

/// Heap addresses start here; everything below targets static memory.
pub const HEAP_BASE: i32 = 10_000;

const STATIC_MEM_CELLS: usize = 1024;
const HEAP_CELLS: usize = 4096;
const FP_MEM_CELLS: usize = 1024;

/// One function call in flight.
#[derive(Debug, Clone, Copy)]
struct Frame {
    return_ip: usize,
    saved_bp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapBlock {
    start: usize,
    size: usize,
    allocated: bool,
}

/// Reserved object record for the class system. No opcode in the current set
/// constructs these; the table exists so the runtime state is complete.
#[derive(Debug, Clone)]
pub struct VmObject {
    pub class_name: String,
    pub fields: HashMap<String, i32>,
}

/// Where `INPUT`/`INPUT_STR` read from.
enum Input {
    Stdin,
    Lines(VecDeque<String>),
}

impl Input {
    fn read_line(&mut self) -> String {
        match self {
            Input::Stdin => {
                let mut line = String::new();
                let _ = io::stdin().lock().read_line(&mut line);
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                line
            }
            Input::Lines(lines) => lines.pop_front().unwrap_or_default(),
        }
    }
}

/// Where `PRINT`/`PRINT_STR`/`FPRINT` write to.
enum Output {
    Stdout,
    Buffer(Vec<u8>),
}

impl Output {
    fn write_str(&mut self, s: &str) {
        match self {
            Output::Stdout => {
                print!("{}", s);
                let _ = io::stdout().flush();
            }
            Output::Buffer(buf) => buf.extend_from_slice(s.as_bytes()),
        }
    }
}

/// Stack-based bytecode interpreter.
///
/// Runtime state: an unbounded integer operand stack with a BP-chained call
/// stack, a static data segment and a first-fit heap sharing one address
/// space (split at `HEAP_BASE`), a separate float memory, and an 8-slot
/// circular FPU register stack. Every fault sets the error flag plus a
/// message and halts the machine; there are no recoverable runtime errors.
pub struct Vm {
    code: Vec<u8>,
    ip: usize,
    halted: bool,
    error_flag: bool,
    error_message: String,
    debug: bool,

    stack: Vec<i32>,
    call_stack: Vec<Frame>,
    bp: usize,

    static_mem: Vec<i32>,
    heap: Vec<i32>,
    heap_blocks: Vec<HeapBlock>,

    strings: Vec<String>,
    loaded_strings: usize,

    objects: HashMap<i32, VmObject>,
    next_object_id: i32,

    cmp_flag: i32,

    fpu: [f32; 8],
    fpu_top: usize,
    fp_mem: Vec<f32>,

    instruction_count: usize,
    max_stack: usize,

    input: Input,
    output: Output,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// A VM wired to the process stdin/stdout.
    pub fn new() -> Self {
        Self::with_io(Input::Stdin, Output::Stdout)
    }

    /// A VM with scripted input lines and captured output, for tests and
    /// embedding.
    pub fn capture_io(input_lines: Vec<String>) -> Self {
        Self::with_io(
            Input::Lines(input_lines.into()),
            Output::Buffer(Vec::new()),
        )
    }

    fn with_io(input: Input, output: Output) -> Self {
        Vm {
            code: Vec::new(),
            ip: 0,
            halted: false,
            error_flag: false,
            error_message: String::new(),
            debug: false,
            stack: Vec::new(),
            call_stack: Vec::new(),
            bp: 0,
            static_mem: vec![0; STATIC_MEM_CELLS],
            heap: vec![0; HEAP_CELLS],
            heap_blocks: Vec::new(),
            strings: Vec::new(),
            loaded_strings: 0,
            objects: HashMap::new(),
            next_object_id: 1,
            cmp_flag: 0,
            fpu: [0.0; 8],
            fpu_top: 0,
            fp_mem: vec![0.0; FP_MEM_CELLS],
            instruction_count: 0,
            max_stack: 0,
            input,
            output,
        }
    }

    /// Takes everything written so far from a captured output buffer.
    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            Output::Buffer(buf) => String::from_utf8_lossy(&std::mem::take(buf)).into_owned(),
            Output::Stdout => String::new(),
        }
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    /// Loads a container and resets the machine to a just-loaded state.
    pub fn load(&mut self, image: Image) {
        self.strings = image.strings;
        self.loaded_strings = self.strings.len();
        self.code = image.code;
        self.reset();
    }

    /// Returns the machine to a just-loaded state: clears the stacks, heap
    /// blocks and statistics, zeros all memories and the FPU, and drops
    /// strings appended at runtime. The loaded code and string table are
    /// preserved.
    pub fn reset(&mut self) {
        self.ip = 0;
        self.halted = false;
        self.error_flag = false;
        self.error_message.clear();
        self.stack.clear();
        self.call_stack.clear();
        self.bp = 0;
        self.objects.clear();
        self.next_object_id = 1;
        self.cmp_flag = 0;
        self.instruction_count = 0;
        self.max_stack = 0;
        self.fpu = [0.0; 8];
        self.fpu_top = 0;
        self.static_mem.fill(0);
        self.heap.fill(0);
        self.heap_blocks.clear();
        self.fp_mem.fill(0.0);
        self.strings.truncate(self.loaded_strings);
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn has_error(&self) -> bool {
        self.error_flag
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    /// Runs until HALT or a fault.
    pub fn run(&mut self) {
        while !self.halted && !self.error_flag {
            self.step();
        }
    }

    /// Executes a single instruction and updates statistics.
    pub fn step(&mut self) {
        if self.halted || self.error_flag {
            return;
        }
        if self.ip >= self.code.len() {
            self.fault("Instruction pointer out of bounds");
            return;
        }

        self.execute_instruction();
        self.instruction_count += 1;

        if self.stack.len() > self.max_stack {
            self.max_stack = self.stack.len();
        }
    }

    fn fault(&mut self, message: impl Into<String>) {
        self.error_flag = true;
        self.error_message = message.into();
        self.halted = true;
    }

    // ------------------------------------------------------------------
    // Decode
    // ------------------------------------------------------------------

    fn read_byte(&mut self) -> u8 {
        if self.ip >= self.code.len() {
            self.fault("Unexpected end of bytecode");
            return 0;
        }
        let byte = self.code[self.ip];
        self.ip += 1;
        byte
    }

    fn read_i32(&mut self) -> i32 {
        if self.ip + 4 > self.code.len() {
            self.fault("Unexpected end of bytecode reading int32");
            return 0;
        }
        let value = i32::from_le_bytes([
            self.code[self.ip],
            self.code[self.ip + 1],
            self.code[self.ip + 2],
            self.code[self.ip + 3],
        ]);
        self.ip += 4;
        value
    }

    fn read_f32(&mut self) -> f32 {
        if self.ip + 4 > self.code.len() {
            self.fault("Unexpected end of bytecode reading float32");
            return 0.0;
        }
        let value = f32::from_le_bytes([
            self.code[self.ip],
            self.code[self.ip + 1],
            self.code[self.ip + 2],
            self.code[self.ip + 3],
        ]);
        self.ip += 4;
        value
    }

    // ------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------

    fn execute_instruction(&mut self) {
        let op_ip = self.ip;
        let byte = self.read_byte();
        let op = match Opcode::from_byte(byte) {
            Some(op) => op,
            None => {
                self.fault(format!("Unknown opcode: 0x{:02X}", byte));
                return;
            }
        };

        if self.debug {
            eprintln!("[{}] {}", op_ip, op.mnemonic());
        }

        match op {
            Opcode::Push => {
                let value = self.read_i32();
                self.push(value);
            }
            Opcode::Pop => {
                self.pop();
            }
            Opcode::Add => {
                let b = self.pop();
                let a = self.pop();
                self.push(a.wrapping_add(b));
            }
            Opcode::Sub => {
                let b = self.pop();
                let a = self.pop();
                self.push(a.wrapping_sub(b));
            }
            Opcode::Mul => {
                let b = self.pop();
                let a = self.pop();
                self.push(a.wrapping_mul(b));
            }
            Opcode::Div => {
                let b = self.pop();
                let a = self.pop();
                if b == 0 {
                    self.fault("Division by zero");
                    return;
                }
                self.push(a.wrapping_div(b));
            }
            Opcode::Mod => {
                let b = self.pop();
                let a = self.pop();
                if b == 0 {
                    self.fault("Modulo by zero");
                    return;
                }
                self.push(a.wrapping_rem(b));
            }
            Opcode::Dup => {
                let top = self.peek();
                self.push(top);
            }
            Opcode::Swap => {
                if self.stack.len() < 2 {
                    self.fault("Stack underflow in SWAP");
                    return;
                }
                let a = self.pop();
                let b = self.pop();
                self.push(a);
                self.push(b);
            }
            Opcode::Print => {
                let value = self.pop();
                self.output.write_str(&value.to_string());
            }
            Opcode::PrintStr => {
                let id = self.pop();
                let text = usize::try_from(id)
                    .ok()
                    .and_then(|i| self.strings.get(i))
                    .cloned();
                match text {
                    Some(s) => self.output.write_str(&s),
                    None => self.fault("Invalid string ID"),
                }
            }
            Opcode::Input => {
                let line = self.input.read_line();
                let value = parse_leading_int(&line);
                self.push(value);
            }
            Opcode::InputStr => {
                let line = self.input.read_line();
                self.strings.push(line);
                self.push((self.strings.len() - 1) as i32);
            }
            Opcode::PushStr => {
                let id = self.read_i32();
                self.push(id);
            }
            Opcode::Jmp => {
                let addr = self.read_i32();
                self.ip = addr as usize;
            }
            Opcode::Jz => {
                let addr = self.read_i32();
                let value = self.pop();
                if value == 0 {
                    self.ip = addr as usize;
                }
            }
            Opcode::Jnz => {
                let addr = self.read_i32();
                let value = self.pop();
                if value != 0 {
                    self.ip = addr as usize;
                }
            }
            Opcode::Cmp => {
                let b = self.pop();
                let a = self.pop();
                self.cmp_flag = match a.cmp(&b) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                };
            }
            Opcode::Jl => {
                let addr = self.read_i32();
                if self.cmp_flag < 0 {
                    self.ip = addr as usize;
                }
            }
            Opcode::Jg => {
                let addr = self.read_i32();
                if self.cmp_flag > 0 {
                    self.ip = addr as usize;
                }
            }
            Opcode::Jle => {
                let addr = self.read_i32();
                if self.cmp_flag <= 0 {
                    self.ip = addr as usize;
                }
            }
            Opcode::Jge => {
                let addr = self.read_i32();
                if self.cmp_flag >= 0 {
                    self.ip = addr as usize;
                }
            }
            Opcode::Call => {
                let addr = self.read_i32();
                self.call_stack.push(Frame {
                    return_ip: self.ip,
                    saved_bp: self.bp,
                });
                self.ip = addr as usize;
            }
            Opcode::Ret => {
                let frame = match self.call_stack.pop() {
                    Some(frame) => frame,
                    None => {
                        self.fault("Return without call");
                        return;
                    }
                };
                self.ip = frame.return_ip;
                self.bp = frame.saved_bp;
            }
            Opcode::PushBp => {
                let bp = self.bp as i32;
                self.push(bp);
                self.bp = self.stack.len();
            }
            Opcode::PopBp => {
                // Restore BP from the saved cell at stack[BP-1]; the cell is
                // not popped, the caller drains it.
                if self.bp == 0 || self.bp > self.stack.len() {
                    self.fault("Invalid base pointer in POP_BP");
                    return;
                }
                self.bp = self.stack[self.bp - 1] as usize;
            }
            Opcode::Load => {
                let addr = self.read_i32();
                let value = self.load_memory(addr);
                self.push(value);
            }
            Opcode::Store => {
                let addr = self.pop();
                let value = self.pop();
                self.store_memory(addr, value);
            }
            Opcode::LoadBp => {
                let offset = self.read_i32();
                let addr = self.bp as i64 + offset as i64;
                if addr < 0 || addr >= self.stack.len() as i64 {
                    self.fault("BP-relative load out of bounds");
                    return;
                }
                let value = self.stack[addr as usize];
                self.push(value);
            }
            Opcode::StoreBp => {
                let offset = self.read_i32();
                let value = self.pop();
                let addr = self.bp as i64 + offset as i64;
                if addr < 0 {
                    self.fault("BP-relative store out of bounds (negative address)");
                    return;
                }
                let addr = addr as usize;
                if addr >= self.stack.len() {
                    self.stack.resize(addr + 1, 0);
                }
                self.stack[addr] = value;
            }
            Opcode::LoadIndirect => {
                let addr = self.pop();
                let value = self.load_memory(addr);
                self.push(value);
            }
            Opcode::StoreIndirect => {
                let addr = self.pop();
                let value = self.pop();
                self.store_memory(addr, value);
            }
            Opcode::Alloc => {
                let size = self.pop();
                if size <= 0 {
                    self.fault("Invalid allocation size");
                    return;
                }
                let addr = self.alloc_heap(size as usize);
                self.push(addr);
            }
            Opcode::Free => {
                let addr = self.pop();
                if addr < 0 {
                    self.fault("Invalid address for free");
                    return;
                }
                self.free_heap(addr);
            }

            // --- FPU ---
            Opcode::Fpush => {
                let value = self.read_f32();
                self.fpush(value);
            }
            Opcode::Fpop => {
                self.fpop();
            }
            Opcode::Fadd => {
                let b = self.fpop();
                let a = self.fpop();
                self.fpush(a + b);
            }
            Opcode::Fsub => {
                let b = self.fpop();
                let a = self.fpop();
                self.fpush(a - b);
            }
            Opcode::Fmul => {
                let b = self.fpop();
                let a = self.fpop();
                self.fpush(a * b);
            }
            Opcode::Fdiv => {
                let b = self.fpop();
                let a = self.fpop();
                if b == 0.0 {
                    self.fault("FPU division by zero");
                    return;
                }
                self.fpush(a / b);
            }
            Opcode::Fload => {
                let addr = self.read_i32();
                if addr < 0 {
                    self.fault("Negative FPU memory address");
                    return;
                }
                let addr = addr as usize;
                if addr >= self.fp_mem.len() {
                    self.fault("FPU memory access out of bounds");
                    return;
                }
                let value = self.fp_mem[addr];
                self.fpush(value);
            }
            Opcode::Fstore => {
                let addr = self.read_i32();
                let value = self.fpop();
                if addr < 0 {
                    self.fault("Negative FPU memory address");
                    return;
                }
                let addr = addr as usize;
                if addr >= self.fp_mem.len() {
                    self.fp_mem.resize(addr + 256, 0.0);
                }
                self.fp_mem[addr] = value;
            }
            Opcode::Fprint => {
                let value = self.fpop();
                let text = format_float(value);
                self.output.write_str(&text);
            }
            Opcode::Fcmp => {
                let b = self.fpop();
                let a = self.fpop();
                self.cmp_flag = if a < b {
                    -1
                } else if a > b {
                    1
                } else {
                    0
                };
            }
            Opcode::Fneg => {
                let value = self.fpop();
                self.fpush(-value);
            }
            Opcode::Fdup => {
                let value = self.fpeek();
                self.fpush(value);
            }
            Opcode::IntToFp => {
                let value = self.pop();
                self.fpush(value as f32);
            }
            Opcode::FpToInt => {
                let value = self.fpop();
                self.push(value as i32);
            }

            Opcode::Halt => {
                self.halted = true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Integer stack
    // ------------------------------------------------------------------

    fn push(&mut self, value: i32) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> i32 {
        match self.stack.pop() {
            Some(value) => value,
            None => {
                self.fault("Stack underflow");
                0
            }
        }
    }

    /// Top of the integer stack, or a synthetic 0 when empty.
    fn peek(&self) -> i32 {
        self.stack.last().copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    fn is_heap_address(&self, addr: i32) -> bool {
        addr >= HEAP_BASE
    }

    fn store_memory(&mut self, addr: i32, value: i32) {
        if addr < 0 {
            self.fault("Negative memory address");
            return;
        }
        if self.is_heap_address(addr) {
            let offset = (addr - HEAP_BASE) as usize;
            if offset >= self.heap.len() {
                self.heap.resize(offset + 1024, 0);
            }
            self.heap[offset] = value;
        } else {
            let addr = addr as usize;
            if addr >= self.static_mem.len() {
                self.static_mem.resize(addr + 1024, 0);
            }
            self.static_mem[addr] = value;
        }
    }

    fn load_memory(&mut self, addr: i32) -> i32 {
        if addr < 0 {
            self.fault("Negative memory address");
            return 0;
        }
        if self.is_heap_address(addr) {
            let offset = (addr - HEAP_BASE) as usize;
            if offset >= self.heap.len() {
                self.fault("Heap memory access out of bounds");
                return 0;
            }
            self.heap[offset]
        } else {
            let addr = addr as usize;
            if addr >= self.static_mem.len() {
                self.fault("Memory access out of bounds");
                return 0;
            }
            self.static_mem[addr]
        }
    }

    // ------------------------------------------------------------------
    // Heap allocator
    // ------------------------------------------------------------------

    /// First-fit allocation. A free block larger than the request is split,
    /// with the excess appended as a new trailing free block; otherwise a
    /// fresh block is appended after the last one.
    fn alloc_heap(&mut self, size: usize) -> i32 {
        for i in 0..self.heap_blocks.len() {
            let block = self.heap_blocks[i];
            if !block.allocated && block.size >= size {
                if block.size > size {
                    self.heap_blocks.push(HeapBlock {
                        start: block.start + size,
                        size: block.size - size,
                        allocated: false,
                    });
                }
                self.heap_blocks[i].size = size;
                self.heap_blocks[i].allocated = true;

                let end = block.start + size;
                if end > self.heap.len() {
                    self.heap.resize(end + 1024, 0);
                }
                return HEAP_BASE + block.start as i32;
            }
        }

        let new_start = self
            .heap_blocks
            .last()
            .map(|b| b.start + b.size)
            .unwrap_or(0);

        let end = new_start + size;
        if end > self.heap.len() {
            self.heap.resize(end + 1024, 0);
        }

        self.heap_blocks.push(HeapBlock {
            start: new_start,
            size,
            allocated: true,
        });
        HEAP_BASE + new_start as i32
    }

    /// Frees an allocated block and zeros its cells. No coalescing.
    fn free_heap(&mut self, addr: i32) {
        if !self.is_heap_address(addr) {
            self.fault("Attempting to free non-heap address");
            return;
        }

        let offset = (addr - HEAP_BASE) as usize;
        for i in 0..self.heap_blocks.len() {
            let block = self.heap_blocks[i];
            if block.start == offset && block.allocated {
                self.heap_blocks[i].allocated = false;
                for cell in offset..(offset + block.size).min(self.heap.len()) {
                    self.heap[cell] = 0;
                }
                return;
            }
        }

        self.fault("Invalid heap address for free operation");
    }

    // ------------------------------------------------------------------
    // FPU: 8-slot circular register stack
    // ------------------------------------------------------------------

    fn fpush(&mut self, value: f32) {
        self.fpu_top = (self.fpu_top + 7) % 8;
        self.fpu[self.fpu_top] = value;
    }

    fn fpop(&mut self) -> f32 {
        let value = self.fpu[self.fpu_top];
        self.fpu[self.fpu_top] = 0.0;
        self.fpu_top = (self.fpu_top + 1) % 8;
        value
    }

    fn fpeek(&self) -> f32 {
        self.fpu[self.fpu_top]
    }

    // ------------------------------------------------------------------
    // Debug dumps and statistics
    // ------------------------------------------------------------------

    pub fn dump_stack(&self) {
        println!("\n=== Stack Dump ===");
        println!("Size: {}", self.stack.len());
        if self.stack.is_empty() {
            println!("(empty)");
            return;
        }
        for i in (0..self.stack.len()).rev() {
            let marker = if i == self.bp { " <-- BP" } else { "" };
            println!("[{}] {}{}", i, self.stack[i], marker);
        }
    }

    pub fn dump_memory(&self) {
        println!("\n=== Memory Dump ===");
        let mut has_data = false;
        for (i, &value) in self.static_mem.iter().enumerate() {
            if value != 0 {
                has_data = true;
                println!("[{}] = {}", i, value);
            }
        }
        if !has_data {
            println!("(all zeros)");
        }
    }

    pub fn print_stats(&self) {
        println!("\n=== VM Statistics ===");
        println!("Instructions executed: {}", self.instruction_count);
        println!("Max stack depth: {}", self.max_stack);
        println!("Objects created: {}", self.next_object_id - 1);
        println!("Static memory allocated: {} cells", self.static_mem.len());
        println!("Heap size: {} cells", self.heap.len());
        let allocated = self.heap_blocks.iter().filter(|b| b.allocated).count();
        println!(
            "Heap blocks: {} ({} allocated, {} free)",
            self.heap_blocks.len(),
            allocated,
            self.heap_blocks.len() - allocated
        );
    }
}

/// Reads a leading optionally-signed integer off a line, like the stream
/// extraction the language's `cin` maps to. Garbage yields 0.
fn parse_leading_int(line: &str) -> i32 {
    let s = line.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    s[..end].parse::<i32>().unwrap_or(0)
}

/// Formats a float with six significant digits: fixed notation for small
/// exponents, scientific otherwise.
fn format_float(value: f32) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // Decimal exponent from the shortest scientific rendering.
    let sci = format!("{:e}", value.abs());
    let exp: i32 = sci
        .split('e')
        .nth(1)
        .and_then(|e| e.parse().ok())
        .unwrap_or(0);

    if (-4..6).contains(&exp) {
        let precision = (5 - exp).max(0) as usize;
        let mut s = format!("{:.*}", precision, value);
        if s.contains('.') {
            while s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.pop();
            }
        }
        s
    } else {
        let mantissa = value / 10f32.powi(exp);
        let mut m = format!("{:.5}", mantissa);
        while m.ends_with('0') {
            m.pop();
        }
        if m.ends_with('.') {
            m.pop();
        }
        format!("{}e{}{:02}", m, if exp < 0 { '-' } else { '+' }, exp.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn compile(src: &str) -> Image {
        let tokens = Lexer::new(src).tokenize().expect("lex failed");
        let program = Parser::new(tokens).parse_program().expect("parse failed");
        Compiler::new().compile(&program).expect("compile failed")
    }

    fn run_source(src: &str, input: &[&str]) -> (String, Vm) {
        let image = compile(src);
        let mut vm = Vm::capture_io(input.iter().map(|s| s.to_string()).collect());
        vm.load(image);
        vm.run();
        let out = vm.take_output();
        (out, vm)
    }

    fn run_code(code: Vec<u8>, strings: Vec<&str>, input: &[&str]) -> (String, Vm) {
        let image = Image {
            strings: strings.into_iter().map(|s| s.to_string()).collect(),
            code,
        };
        let mut vm = Vm::capture_io(input.iter().map(|s| s.to_string()).collect());
        vm.load(image);
        vm.run();
        let out = vm.take_output();
        (out, vm)
    }

    fn op(code: &mut Vec<u8>, o: Opcode) {
        code.push(o as u8);
    }

    fn op_i32(code: &mut Vec<u8>, o: Opcode, v: i32) {
        code.push(o as u8);
        code.extend_from_slice(&v.to_le_bytes());
    }

    // ------------------------------------------------------------------
    // End-to-end scenarios
    // ------------------------------------------------------------------

    #[test]
    fn test_scenario_hello_integer() {
        let (out, vm) = run_source(
            "int main() { int x = 10; int y = 20; print(x + y); return 0; }",
            &[],
        );
        assert_eq!(out, "30");
        assert!(!vm.has_error());
        assert!(vm.call_stack.is_empty());
        assert_eq!(vm.bp, 0);
    }

    #[test]
    fn test_scenario_iterative_counter() {
        let (out, vm) = run_source(
            "int main() { int i = 0; while (i < 10) { i = i + 1; std::cout << i; } return 0; }",
            &[],
        );
        assert_eq!(out, "12345678910");
        assert!(!vm.has_error());
    }

    #[test]
    fn test_scenario_euler_series() {
        let src = "int main() {\n\
                       int iterations = 15;\n\
                       float e = 1.0;\n\
                       float term = 1.0;\n\
                       int i = 1;\n\
                       while (i <= iterations) {\n\
                           term = term / i;\n\
                           e = e + term;\n\
                           i = i + 1;\n\
                       }\n\
                       println(e);\n\
                       return 0;\n\
                   }";
        let (out, vm) = run_source(src, &[]);
        assert!(!vm.has_error(), "vm error: {}", vm.error_message());
        let printed: f32 = out.trim().parse().expect("expected a float on stdout");
        assert!(
            (printed - std::f32::consts::E).abs() < 1e-5,
            "got {}",
            printed
        );
        assert_eq!(out.trim(), "2.71828");
    }

    #[test]
    fn test_scenario_heap_round_trip() {
        let (out, vm) = run_source(
            "int main() { int* p = new int[3]; p[0] = 7; p[1] = 8; p[2] = 9; \
             print(p[0] + p[1] + p[2]); delete p; return 0; }",
            &[],
        );
        assert_eq!(out, "24");
        assert!(!vm.has_error());
        // The freed block is marked free and its cells are zeroed.
        assert_eq!(vm.heap_blocks.len(), 1);
        assert!(!vm.heap_blocks[0].allocated);
        assert_eq!(&vm.heap[0..3], &[0, 0, 0]);
    }

    #[test]
    fn test_scenario_recursion() {
        let (out, vm) = run_source(
            "int fact(int n) { if (n <= 1) return 1; return n * fact(n - 1); }\n\
             int main() { print(fact(5)); return 0; }",
            &[],
        );
        assert_eq!(out, "120");
        assert!(!vm.has_error());
        assert!(vm.call_stack.is_empty());
        assert_eq!(vm.bp, 0);
    }

    #[test]
    fn test_scenario_division_by_zero_faults() {
        let (_, vm) = run_source(
            "int main() { int a = 1; int b = 0; print(a / b); return 0; }",
            &[],
        );
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Division by zero"));
    }

    #[test]
    fn test_deterministic_execution() {
        let src =
            "int main() { int i = 0; while (i < 10) { i = i + 1; std::cout << i; } return 0; }";
        let (a, _) = run_source(src, &[]);
        let (b, _) = run_source(src, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reset_then_rerun_is_identical() {
        let image = compile("int main() { print(6 * 7); return 0; }");
        let mut vm = Vm::capture_io(vec![]);
        vm.load(image);
        vm.run();
        let first = vm.take_output();
        vm.reset();
        vm.run();
        let second = vm.take_output();
        assert_eq!(first, "42");
        assert_eq!(first, second);
    }

    // ------------------------------------------------------------------
    // Instruction semantics
    // ------------------------------------------------------------------

    #[test]
    fn test_cmp_sets_sign_flag() {
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 1);
        op_i32(&mut code, Opcode::Push, 2);
        op(&mut code, Opcode::Cmp);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.cmp_flag, -1);

        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 5);
        op_i32(&mut code, Opcode::Push, 5);
        op(&mut code, Opcode::Cmp);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.cmp_flag, 0);

        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 9);
        op_i32(&mut code, Opcode::Push, 2);
        op(&mut code, Opcode::Cmp);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.cmp_flag, 1);
    }

    #[test]
    fn test_conditional_jumps_follow_cmp_flag() {
        // 1 < 2: JL taken, lands on PUSH 42.
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 1);
        op_i32(&mut code, Opcode::Push, 2);
        op(&mut code, Opcode::Cmp); // 11 bytes so far
        op_i32(&mut code, Opcode::Jl, 22); // 5 bytes -> 16
        op_i32(&mut code, Opcode::Push, 99); // -> 21
        op(&mut code, Opcode::Halt); // -> 22
        op_i32(&mut code, Opcode::Push, 42); // target
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.stack, vec![42]);

        // 3 < 2 is false: JL falls through to PUSH 99.
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 3);
        op_i32(&mut code, Opcode::Push, 2);
        op(&mut code, Opcode::Cmp);
        op_i32(&mut code, Opcode::Jl, 22);
        op_i32(&mut code, Opcode::Push, 99);
        op(&mut code, Opcode::Halt);
        op_i32(&mut code, Opcode::Push, 42);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.stack, vec![99]);
    }

    #[test]
    fn test_jmp_lands_on_recorded_address() {
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Jmp, 11); // 5 bytes
        op_i32(&mut code, Opcode::Push, 1); // skipped -> 10
        op(&mut code, Opcode::Halt); // skipped -> 11
        op_i32(&mut code, Opcode::Push, 7); // target at 11
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.stack, vec![7]);
    }

    #[test]
    fn test_bp_relative_parameter_addressing() {
        // Three arguments, then inside the callee the parameters reload at
        // BP-4, BP-3, BP-2.
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 10); // 5
        op_i32(&mut code, Opcode::Push, 20); // 10
        op_i32(&mut code, Opcode::Push, 30); // 15
        op_i32(&mut code, Opcode::Call, 21); // 20
        op(&mut code, Opcode::Halt); // 21
        op(&mut code, Opcode::PushBp); // 22
        op_i32(&mut code, Opcode::LoadBp, -4);
        op_i32(&mut code, Opcode::LoadBp, -3);
        op_i32(&mut code, Opcode::LoadBp, -2);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        let n = vm.stack.len();
        assert_eq!(&vm.stack[n - 3..], &[10, 20, 30]);
    }

    #[test]
    fn test_i32_and_f32_operands_round_trip_little_endian() {
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, -123_456_789);
        code.push(Opcode::Fpush as u8);
        code.extend_from_slice(&3.25f32.to_le_bytes());
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.stack, vec![-123_456_789]);
        assert_eq!(vm.fpu[vm.fpu_top], 3.25);
    }

    #[test]
    fn test_store_pops_address_then_value() {
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 77); // value
        op_i32(&mut code, Opcode::Push, 5); // address
        op(&mut code, Opcode::Store);
        op_i32(&mut code, Opcode::Load, 5);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.stack, vec![77]);
        assert_eq!(vm.static_mem[5], 77);
    }

    #[test]
    fn test_input_parses_leading_integer() {
        let mut code = Vec::new();
        op(&mut code, Opcode::Input);
        op(&mut code, Opcode::Print);
        op(&mut code, Opcode::Halt);
        let (out, _) = run_code(code.clone(), vec![], &["42"]);
        assert_eq!(out, "42");
        let (out, _) = run_code(code.clone(), vec![], &["  -7 trailing"]);
        assert_eq!(out, "-7");
        let (out, _) = run_code(code, vec![], &["garbage"]);
        assert_eq!(out, "0");
    }

    #[test]
    fn test_input_str_appends_to_string_table() {
        let mut code = Vec::new();
        op(&mut code, Opcode::InputStr);
        op(&mut code, Opcode::PrintStr);
        op(&mut code, Opcode::Halt);
        let (out, vm) = run_code(code, vec!["preloaded"], &["hello there"]);
        assert_eq!(out, "hello there");
        assert_eq!(vm.strings.len(), 2);
    }

    // ------------------------------------------------------------------
    // FPU
    // ------------------------------------------------------------------

    #[test]
    fn test_fpu_is_lifo_through_all_eight_slots() {
        let mut vm = Vm::capture_io(vec![]);
        for i in 0..8 {
            vm.fpush(i as f32 + 1.0);
        }
        for i in (0..8).rev() {
            assert_eq!(vm.fpop(), i as f32 + 1.0);
        }
    }

    #[test]
    fn test_fpu_wraps_after_eight_values() {
        // The ninth push silently reuses the oldest slot.
        let mut vm = Vm::capture_io(vec![]);
        for i in 0..9 {
            vm.fpush(i as f32);
        }
        assert_eq!(vm.fpop(), 8.0);
    }

    #[test]
    fn test_fpop_zeroes_the_slot() {
        let mut vm = Vm::capture_io(vec![]);
        vm.fpush(3.5);
        let top = vm.fpu_top;
        assert_eq!(vm.fpop(), 3.5);
        assert_eq!(vm.fpu[top], 0.0);
    }

    #[test]
    fn test_float_arithmetic_round_trip() {
        let mut code = Vec::new();
        code.push(Opcode::Fpush as u8);
        code.extend_from_slice(&1.5f32.to_le_bytes());
        code.push(Opcode::Fpush as u8);
        code.extend_from_slice(&2.25f32.to_le_bytes());
        op(&mut code, Opcode::Fadd);
        op(&mut code, Opcode::Fprint);
        op(&mut code, Opcode::Halt);
        let (out, _) = run_code(code, vec![], &[]);
        assert_eq!(out, "3.75");
    }

    #[test]
    fn test_float_division_by_zero_faults() {
        let mut code = Vec::new();
        code.push(Opcode::Fpush as u8);
        code.extend_from_slice(&1.0f32.to_le_bytes());
        code.push(Opcode::Fpush as u8);
        code.extend_from_slice(&0.0f32.to_le_bytes());
        op(&mut code, Opcode::Fdiv);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("division by zero"));
    }

    // ------------------------------------------------------------------
    // Heap allocator
    // ------------------------------------------------------------------

    #[test]
    fn test_alloc_addresses_are_heap_based_and_unique() {
        let mut vm = Vm::capture_io(vec![]);
        let a = vm.alloc_heap(3);
        let b = vm.alloc_heap(5);
        assert!(a >= HEAP_BASE);
        assert!(b >= HEAP_BASE);
        assert_ne!(a, b);
        assert_eq!(a, HEAP_BASE);
        assert_eq!(b, HEAP_BASE + 3);
    }

    #[test]
    fn test_first_fit_splits_the_first_large_enough_block() {
        let mut vm = Vm::capture_io(vec![]);
        // Build free blocks of sizes [4, 8, 4].
        let a = vm.alloc_heap(4);
        let b = vm.alloc_heap(8);
        let c = vm.alloc_heap(4);
        vm.free_heap(a);
        vm.free_heap(b);
        vm.free_heap(c);

        let d = vm.alloc_heap(3);
        // The first 4-cell block is chosen and split.
        assert_eq!(d, HEAP_BASE);

        let mut blocks: Vec<(usize, usize, bool)> = vm
            .heap_blocks
            .iter()
            .map(|b| (b.start, b.size, b.allocated))
            .collect();
        blocks.sort();
        assert_eq!(
            blocks,
            vec![(0, 3, true), (3, 1, false), (4, 8, false), (12, 4, false)]
        );
    }

    #[test]
    fn test_free_zeroes_cells() {
        let mut vm = Vm::capture_io(vec![]);
        let addr = vm.alloc_heap(4);
        for i in 0..4 {
            vm.store_memory(addr + i, 9);
        }
        vm.free_heap(addr);
        for i in 0..4 {
            assert_eq!(vm.heap[i], 0);
        }
    }

    #[test]
    fn test_free_of_non_heap_address_faults() {
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 5);
        op(&mut code, Opcode::Free);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("non-heap"));
    }

    #[test]
    fn test_double_free_faults() {
        let mut vm = Vm::capture_io(vec![]);
        let addr = vm.alloc_heap(2);
        vm.free_heap(addr);
        vm.free_heap(addr);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Invalid heap address"));
    }

    // ------------------------------------------------------------------
    // Faults
    // ------------------------------------------------------------------

    #[test]
    fn test_pop_on_empty_stack_faults() {
        let (_, vm) = run_code(vec![Opcode::Pop as u8], vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Stack underflow"));
    }

    #[test]
    fn test_ret_without_call_faults() {
        let (_, vm) = run_code(vec![Opcode::Ret as u8], vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Return without call"));
    }

    #[test]
    fn test_pop_bp_with_zero_bp_faults() {
        let (_, vm) = run_code(vec![Opcode::PopBp as u8], vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Invalid base pointer"));
    }

    #[test]
    fn test_unknown_opcode_faults() {
        let (_, vm) = run_code(vec![0x0E], vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Unknown opcode"));
    }

    #[test]
    fn test_running_off_the_end_faults() {
        let (_, vm) = run_code(vec![Opcode::Push as u8, 1, 0], vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Unexpected end of bytecode"));
    }

    #[test]
    fn test_empty_code_faults_on_first_step() {
        let (_, vm) = run_code(vec![], vec![], &[]);
        assert!(vm.has_error());
        assert!(vm
            .error_message()
            .contains("Instruction pointer out of bounds"));
    }

    #[test]
    fn test_negative_store_address_faults() {
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 1); // value
        op_i32(&mut code, Opcode::Push, -4); // address
        op(&mut code, Opcode::Store);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Negative memory address"));
    }

    #[test]
    fn test_invalid_string_id_faults() {
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 3);
        op(&mut code, Opcode::PrintStr);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert!(vm.has_error());
        assert!(vm.error_message().contains("Invalid string ID"));
    }

    // ------------------------------------------------------------------
    // Float formatting
    // ------------------------------------------------------------------

    #[test]
    fn test_format_float_six_significant_digits() {
        assert_eq!(format_float(std::f32::consts::E), "2.71828");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(10.0), "10");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(-1.5), "-1.5");
        assert_eq!(format_float(0.0), "0");
    }

    #[test]
    fn test_format_float_scientific_for_large_values() {
        assert_eq!(format_float(1.0e7), "1e+07");
        assert_eq!(format_float(1.234567e8), "1.23457e+08");
        assert_eq!(format_float(1.0e-6), "1e-06");
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[test]
    fn test_reset_preserves_code_and_loaded_strings() {
        let mut code = Vec::new();
        op(&mut code, Opcode::InputStr);
        op(&mut code, Opcode::Pop);
        op(&mut code, Opcode::Halt);
        let image = Image {
            strings: vec!["kept".to_string()],
            code,
        };
        let mut vm = Vm::capture_io(vec!["appended".to_string()]);
        vm.load(image);
        vm.run();
        assert_eq!(vm.strings.len(), 2);
        vm.reset();
        assert_eq!(vm.strings, vec!["kept".to_string()]);
        assert!(!vm.code.is_empty());
        assert!(vm.stack.is_empty());
        assert!(vm.heap_blocks.is_empty());
        assert_eq!(vm.fpu, [0.0; 8]);
    }

    #[test]
    fn test_statistics_track_instructions_and_peak_stack() {
        let mut code = Vec::new();
        op_i32(&mut code, Opcode::Push, 1);
        op_i32(&mut code, Opcode::Push, 2);
        op(&mut code, Opcode::Add);
        op(&mut code, Opcode::Halt);
        let (_, vm) = run_code(code, vec![], &[]);
        assert_eq!(vm.instruction_count(), 4);
        assert_eq!(vm.max_stack, 2);
    }
}
