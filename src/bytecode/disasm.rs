use crate::bytecode::image::Image;
use crate::bytecode::op::Opcode;

/// Print a disassembly of a container image to stdout.
pub fn print_image(image: &Image) {
    print!("{}", format_image(image));
}

/// Render the string table and instruction listing of an image.
pub fn format_image(image: &Image) -> String {
    let mut out = String::new();

    out.push_str("=== String Table ===\n");
    if image.strings.is_empty() {
        out.push_str("(empty)\n");
    } else {
        for (i, s) in image.strings.iter().enumerate() {
            out.push_str(&format!("[{}] {:?}\n", i, s));
        }
    }

    out.push_str("\n=== Code ===\n");
    out.push_str(&format!("Size: {} bytes\n\n", image.code.len()));

    let mut ip = 0usize;
    while ip < image.code.len() {
        out.push_str(&format!("{:6}: ", ip));
        let byte = image.code[ip];
        ip += 1;

        let op = match Opcode::from_byte(byte) {
            Some(op) => op,
            None => {
                out.push_str(&format!(".byte 0x{:02X}\n", byte));
                continue;
            }
        };

        out.push_str(op.mnemonic());

        if op.has_i32_operand() {
            if ip + 4 <= image.code.len() {
                let value = i32::from_le_bytes([
                    image.code[ip],
                    image.code[ip + 1],
                    image.code[ip + 2],
                    image.code[ip + 3],
                ]);
                out.push_str(&format!(" {}", value));
                // Show the pooled string next to its index.
                if op == Opcode::PushStr {
                    if let Some(s) = usize::try_from(value)
                        .ok()
                        .and_then(|i| image.strings.get(i))
                    {
                        out.push_str(&format!("    ; {:?}", s));
                    }
                }
                ip += 4;
            } else {
                out.push_str(" <truncated operand>");
                ip = image.code.len();
            }
        } else if op.has_f32_operand() {
            if ip + 4 <= image.code.len() {
                let value = f32::from_le_bytes([
                    image.code[ip],
                    image.code[ip + 1],
                    image.code[ip + 2],
                    image.code[ip + 3],
                ]);
                out.push_str(&format!(" {}", value));
                ip += 4;
            } else {
                out.push_str(" <truncated operand>");
                ip = image.code.len();
            }
        }

        out.push('\n');
    }

    out
}
