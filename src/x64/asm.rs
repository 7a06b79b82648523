// This module provides the textual x86-64 emission surface for the backend.
// It maps PhysReg handles to register names per class (the narrow/wide
// general-purpose split and the xmm/ymm/zmm aliasing are resolved purely by
// name), formats memory operands for data-section, stack-frame, and indexed
// addressing, and accumulates emitted instruction lines in an AsmWriter that
// strategies append to and Session::apply slices per operation. DataSection
// and StackFrame build the two non-instruction outputs of a compilation:
// named persistent values with type, size, alignment and initializer, and
// named stack-resident values with rbp-relative offsets. Rendering produces
// the plain text handed to the external assembler/runtime.

//! Register naming, memory operands, and the instruction writer.

use hashbrown::HashMap;

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::types::ValueType;

const GP64_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

const GP32_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];

const GP8_NAMES: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];

/// Printed name of a register handle. The class decides the width prefix;
/// the index is shared across aliasing classes.
pub fn reg_name(reg: PhysReg) -> String {
    match reg.class {
        RegClass::Gp64 => GP64_NAMES[reg.index as usize].to_string(),
        RegClass::Gp32 => GP32_NAMES[reg.index as usize].to_string(),
        RegClass::Xmm => format!("xmm{}", reg.index),
        RegClass::Ymm => format!("ymm{}", reg.index),
        RegClass::Zmm => format!("zmm{}", reg.index),
        RegClass::Kmask => format!("k{}", reg.index),
    }
}

/// 8-bit name of a general-purpose register (`cl` for shift counts).
pub fn reg_name_8(reg: PhysReg) -> String {
    GP8_NAMES[reg.index as usize].to_string()
}

/// Memory operand for a named data-section value.
pub fn data_ref(name: &str) -> String {
    format!("[{name}]")
}

/// Memory operand at a byte offset into a named data-section value.
pub fn data_ref_off(name: &str, offset: u32) -> String {
    if offset == 0 {
        data_ref(name)
    } else {
        format!("[{name}+{offset}]")
    }
}

/// Memory operand for a stack slot at an rbp-relative offset.
pub fn stack_ref(offset: i32) -> String {
    if offset < 0 {
        format!("[rbp-{}]", -offset)
    } else {
        format!("[rbp+{offset}]")
    }
}

/// Indexed memory operand: `[base + index*scale + disp]`.
pub fn indexed_ref(base: PhysReg, index: Option<PhysReg>, scale: u32, disp: i64) -> String {
    let mut out = format!("[{}", reg_name(base));
    if let Some(idx) = index {
        out.push_str(&format!(" + {}*{}", reg_name(idx), scale));
    }
    if disp > 0 {
        out.push_str(&format!(" + {disp}"));
    } else if disp < 0 {
        out.push_str(&format!(" - {}", -disp));
    }
    out.push(']');
    out
}

/// Ordered instruction-line buffer for one kernel.
#[derive(Debug, Default)]
pub struct AsmWriter {
    lines: Vec<String>,
}

impl AsmWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a preformatted line.
    pub fn emit(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn inst1(&mut self, mnemonic: &str, a: impl AsRef<str>) {
        self.lines.push(format!("{} {}", mnemonic, a.as_ref()));
    }

    pub fn inst2(&mut self, mnemonic: &str, a: impl AsRef<str>, b: impl AsRef<str>) {
        self.lines
            .push(format!("{} {}, {}", mnemonic, a.as_ref(), b.as_ref()));
    }

    pub fn inst3(
        &mut self,
        mnemonic: &str,
        a: impl AsRef<str>,
        b: impl AsRef<str>,
        c: impl AsRef<str>,
    ) {
        self.lines.push(format!(
            "{} {}, {}, {}",
            mnemonic,
            a.as_ref(),
            b.as_ref(),
            c.as_ref()
        ));
    }

    pub fn inst4(
        &mut self,
        mnemonic: &str,
        a: impl AsRef<str>,
        b: impl AsRef<str>,
        c: impl AsRef<str>,
        d: impl AsRef<str>,
    ) {
        self.lines.push(format!(
            "{} {}, {}, {}, {}",
            mnemonic,
            a.as_ref(),
            b.as_ref(),
            c.as_ref(),
            d.as_ref()
        ));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines emitted since a mark taken with [`AsmWriter::len`].
    pub fn since(&self, mark: usize) -> &[String] {
        &self.lines[mark..]
    }
}

/// Initializer for a named data-section value.
#[derive(Debug, Clone, PartialEq)]
pub enum DataInit {
    /// Zero-filled.
    Zero,
    U32s(Vec<u32>),
    U64s(Vec<u64>),
    F32s(Vec<f32>),
    F64s(Vec<f64>),
}

/// One named persistent value in the kernel data section.
#[derive(Debug, Clone)]
pub struct DataEntry {
    pub name: String,
    /// Declared value type, if the entry backs a typed operand. Structural
    /// entries (array headers, RNG words) carry `None`.
    pub ty: Option<ValueType>,
    pub byte_size: u32,
    pub align: u32,
    pub init: DataInit,
}

/// The named-value binding surface between generated code and the runtime.
#[derive(Debug, Default)]
pub struct DataSection {
    entries: Vec<DataEntry>,
    index: HashMap<String, usize>,
}

impl DataSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a named value. Redefinition is a caller bug.
    pub fn define(&mut self, entry: DataEntry) -> CodegenResult<()> {
        if self.index.contains_key(&entry.name) {
            return Err(CodegenError::InvariantViolation {
                reason: format!("data symbol '{}' defined twice", entry.name),
            });
        }
        self.index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DataEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn entries(&self) -> &[DataEntry] {
        &self.entries
    }

    /// Render the data-section description handed to the assembler.
    pub fn render(&self) -> String {
        let mut out = String::from(".data\n");
        for entry in &self.entries {
            out.push_str(&format!(".align {}\n", entry.align));
            match &entry.ty {
                Some(ty) => out.push_str(&format!("{}: # {}\n", entry.name, ty)),
                None => out.push_str(&format!("{}:\n", entry.name)),
            }
            match &entry.init {
                DataInit::Zero => out.push_str(&format!("    .zero {}\n", entry.byte_size)),
                DataInit::U32s(words) => {
                    let body: Vec<String> =
                        words.iter().map(|w| format!("0x{w:08x}")).collect();
                    out.push_str(&format!("    .long {}\n", body.join(", ")));
                }
                DataInit::U64s(words) => {
                    let body: Vec<String> =
                        words.iter().map(|w| format!("0x{w:016x}")).collect();
                    out.push_str(&format!("    .quad {}\n", body.join(", ")));
                }
                DataInit::F32s(vals) => {
                    let body: Vec<String> = vals.iter().map(|v| format!("{v:?}")).collect();
                    out.push_str(&format!("    .float {}\n", body.join(", ")));
                }
                DataInit::F64s(vals) => {
                    let body: Vec<String> = vals.iter().map(|v| format!("{v:?}")).collect();
                    out.push_str(&format!("    .double {}\n", body.join(", ")));
                }
            }
        }
        out
    }
}

/// One named stack-resident value.
#[derive(Debug, Clone)]
pub struct StackSlot {
    pub name: String,
    pub byte_size: u32,
    pub align: u32,
    /// rbp-relative offset (negative: below the frame pointer).
    pub offset: i32,
}

/// Stack-frame layout for one kernel: named slots growing downward from rbp.
#[derive(Debug, Default)]
pub struct StackFrame {
    slots: Vec<StackSlot>,
    index: HashMap<String, usize>,
    used: u32,
}

impl StackFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a named slot and return its rbp-relative offset.
    pub fn reserve(&mut self, name: &str, byte_size: u32, align: u32) -> CodegenResult<i32> {
        if self.index.contains_key(name) {
            return Err(CodegenError::InvariantViolation {
                reason: format!("stack slot '{name}' reserved twice"),
            });
        }
        let aligned = (self.used + byte_size).next_multiple_of(align.max(1));
        self.used = aligned;
        let offset = -(aligned as i32);
        self.index.insert(name.to_string(), self.slots.len());
        self.slots.push(StackSlot {
            name: name.to_string(),
            byte_size,
            align,
            offset,
        });
        Ok(offset)
    }

    pub fn lookup(&self, name: &str) -> Option<&StackSlot> {
        self.index.get(name).map(|&i| &self.slots[i])
    }

    /// Total frame size, padded to the 16-byte call ABI boundary.
    pub fn frame_size(&self) -> u32 {
        self.used.next_multiple_of(16)
    }

    pub fn slots(&self) -> &[StackSlot] {
        &self.slots
    }

    /// Render the stack-frame layout description.
    pub fn render(&self) -> String {
        let mut out = format!(".frame {}\n", self.frame_size());
        for slot in &self.slots {
            out.push_str(&format!(
                "    {} rbp{} size {} align {}\n",
                slot.name, slot.offset, slot.byte_size, slot.align
            ));
        }
        out
    }
}
