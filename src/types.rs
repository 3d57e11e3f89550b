//! Semantic types and their per-instance lifecycle codegen.
//!
//! Each `SemanticType` knows how to initialize, assign, and finalize an instance
//! addressed by the l-value pointer register (`emitter::registers::LVALUE_PTR`), and
//! how to report a canonical signature string used for structural equality. These are
//! the only places in the compiler that know the machine-level representation of a
//! value of a given type.

use crate::emitter::{emit, registers, Emitter, LabelCounter};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    pub fields: Vec<(String, SemanticType)>,
}

impl RecordLayout {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn field_type(&self, name: &str) -> Option<&SemanticType> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    fn byte_size(&self) -> i64 {
        self.fields.len() as i64 * 8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLayout {
    pub bounds: Vec<(i64, i64)>,
    pub element: Box<SemanticType>,
}

impl ArrayLayout {
    pub fn element_count(&self) -> i64 {
        self.bounds.iter().map(|(min, max)| max - min + 1).product()
    }

}

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticType {
    Integer,
    Double,
    String,
    Pointer(Box<SemanticType>),
    Record(RecordLayout),
    Array(ArrayLayout),
}

impl SemanticType {
    pub fn signature(&self) -> String {
        match self {
            SemanticType::Integer => "integer".to_string(),
            SemanticType::Double => "double".to_string(),
            SemanticType::String => "string".to_string(),
            SemanticType::Pointer(inner) => format!("^{}", inner.signature()),
            SemanticType::Record(layout) => {
                let fields: Vec<String> = layout
                    .fields
                    .iter()
                    .map(|(name, ty)| format!("{}:{}", name, ty.signature()))
                    .collect();
                format!("record{{{}}}", fields.join(";"))
            }
            SemanticType::Array(layout) => {
                let bounds: Vec<String> = layout
                    .bounds
                    .iter()
                    .map(|(min, max)| format!("{min}..{max}"))
                    .collect();
                format!("array[{}] of {}", bounds.join(","), layout.element.signature())
            }
        }
    }

    pub fn allowed_pass_by_value(&self) -> bool {
        matches!(
            self,
            SemanticType::Integer | SemanticType::Double | SemanticType::Pointer(_)
        )
    }

    pub fn needs_finalize(&self) -> bool {
        match self {
            SemanticType::Integer | SemanticType::Double | SemanticType::Pointer(_) => false,
            SemanticType::String | SemanticType::Array(_) => true,
            SemanticType::Record(layout) => layout.fields.iter().any(|(_, t)| t.needs_finalize()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Integer | SemanticType::Double)
    }

    /// Writes a legal zero/empty instance at `*lvalue_ptr`.
    pub fn emit_initialize(&self, ctx: &mut Emitter, labels: &mut LabelCounter) {
        match self {
            SemanticType::Integer | SemanticType::Double | SemanticType::Pointer(_) => {
                emit!(ctx, "mov qword ptr [{}], 0", registers::LVALUE_PTR);
            }
            SemanticType::String => self.emit_initialize_string(ctx),
            SemanticType::Record(layout) => self.emit_initialize_record(ctx, layout, labels),
            SemanticType::Array(layout) => self.emit_initialize_array(ctx, layout, labels),
        }
    }

    /// Consumes one stack word (the r-value) and stores it into `*lvalue_ptr`,
    /// releasing any previously owned resource first.
    pub fn emit_assign(&self, ctx: &mut Emitter, labels: &mut LabelCounter) {
        match self {
            SemanticType::Integer | SemanticType::Double | SemanticType::Pointer(_) => {
                emit!(ctx, "pop rax");
                emit!(ctx, "mov qword ptr [{}], rax", registers::LVALUE_PTR);
            }
            SemanticType::String => self.emit_assign_string(ctx),
            SemanticType::Record(layout) => self.emit_assign_record(ctx, layout, labels),
            SemanticType::Array(layout) => self.emit_assign_array(ctx, layout, labels),
        }
    }

    /// Releases any resources owned by the instance at `*lvalue_ptr`.
    pub fn emit_finalize(&self, ctx: &mut Emitter, labels: &mut LabelCounter) {
        if !self.needs_finalize() {
            return;
        }
        match self {
            SemanticType::String => self.emit_finalize_string(ctx),
            SemanticType::Record(layout) => self.emit_finalize_record(ctx, layout, labels),
            SemanticType::Array(layout) => self.emit_finalize_array(ctx, layout, labels),
            SemanticType::Integer | SemanticType::Double | SemanticType::Pointer(_) => {}
        }
    }

    fn emit_initialize_string(&self, ctx: &mut Emitter) {
        emit!(ctx, "mov rdi, 1");
        emit!(ctx, "lea rax, qword ptr [rip + malloc]");
        emit!(ctx, "call builtin$callsysv");
        emit!(ctx, "mov qword ptr [{}], rax", registers::LVALUE_PTR);
        emit!(ctx, "mov byte ptr [rax], 0");
    }

    fn emit_assign_string(&self, ctx: &mut Emitter) {
        emit!(ctx, "mov rdi, qword ptr [{}]", registers::LVALUE_PTR);
        emit!(ctx, "lea rax, qword ptr [rip + free]");
        emit!(ctx, "call builtin$callsysv");
        emit!(ctx, "pop rdi");
        emit!(ctx, "push rdi");
        emit!(ctx, "lea rax, qword ptr [rip + strlen]");
        emit!(ctx, "call builtin$callsysv");
        emit!(ctx, "mov rdi, rax");
        emit!(ctx, "add rdi, 1");
        emit!(ctx, "lea rax, qword ptr [rip + malloc]");
        emit!(ctx, "call builtin$callsysv");
        emit!(ctx, "mov qword ptr [{}], rax", registers::LVALUE_PTR);
        emit!(ctx, "mov rdi, rax");
        emit!(ctx, "pop rsi");
        emit!(ctx, "lea rax, qword ptr [rip + strcpy]");
        emit!(ctx, "call builtin$callsysv");
    }

    fn emit_finalize_string(&self, ctx: &mut Emitter) {
        emit!(ctx, "mov rdi, qword ptr [{}]", registers::LVALUE_PTR);
        emit!(ctx, "lea rax, qword ptr [rip + free]");
        emit!(ctx, "call builtin$callsysv");
    }

    fn emit_initialize_record(&self, ctx: &mut Emitter, layout: &RecordLayout, labels: &mut LabelCounter) {
        emit!(ctx, "mov rdi, {}", layout.byte_size().max(0));
        emit!(ctx, "lea rax, qword ptr [rip + malloc]");
        emit!(ctx, "call builtin$callsysv");
        emit!(ctx, "mov qword ptr [{}], rax", registers::LVALUE_PTR);
        emit!(ctx, "push rax");
        for (idx, (_, field_ty)) in layout.fields.iter().enumerate() {
            emit!(ctx, "mov rax, qword ptr [rsp]");
            emit!(
                ctx,
                "lea {}, qword ptr [rax + {}*8]",
                registers::LVALUE_PTR,
                idx
            );
            field_ty.emit_initialize(ctx, labels);
        }
        emit!(ctx, "add rsp, 8");
    }

    /// Field-level finalize-then-install only; the record's own backing buffer is
    /// never freed or reallocated here, only in `emit_finalize` (see DESIGN.md).
    fn emit_assign_record(&self, ctx: &mut Emitter, layout: &RecordLayout, labels: &mut LabelCounter) {
        emit!(
            ctx,
            "mov {}, qword ptr [{}]",
            registers::FRAME_BASE,
            registers::LVALUE_PTR
        );
        for (idx, (_, field_ty)) in layout.fields.iter().enumerate() {
            emit!(
                ctx,
                "lea {}, qword ptr [{} + {}*8]",
                registers::LVALUE_PTR,
                registers::FRAME_BASE,
                idx
            );
            emit!(ctx, "push {}", registers::FRAME_BASE);
            emit!(ctx, "mov {}, qword ptr [rsp + 8]", registers::FRAME_BASE);
            emit!(
                ctx,
                "mov rax, qword ptr [{} + {}*8]",
                registers::FRAME_BASE,
                idx
            );
            emit!(ctx, "push rax");
            field_ty.emit_assign(ctx, labels);
            emit!(ctx, "pop {}", registers::FRAME_BASE);
        }
        emit!(ctx, "add rsp, 8");
    }

    fn emit_finalize_record(&self, ctx: &mut Emitter, layout: &RecordLayout, labels: &mut LabelCounter) {
        emit!(
            ctx,
            "mov {}, qword ptr [{}]",
            registers::FRAME_BASE,
            registers::LVALUE_PTR
        );
        for (idx, (_, field_ty)) in layout.fields.iter().enumerate() {
            if !field_ty.needs_finalize() {
                continue;
            }
            emit!(
                ctx,
                "lea {}, qword ptr [{} + {}*8]",
                registers::LVALUE_PTR,
                registers::FRAME_BASE,
                idx
            );
            emit!(ctx, "push {}", registers::FRAME_BASE);
            field_ty.emit_finalize(ctx, labels);
            emit!(ctx, "pop {}", registers::FRAME_BASE);
        }
        emit!(ctx, "mov rdi, {}", registers::FRAME_BASE);
        emit!(ctx, "lea rax, qword ptr [rip + free]");
        emit!(ctx, "call builtin$callsysv");
    }

    fn emit_initialize_array(&self, ctx: &mut Emitter, layout: &ArrayLayout, labels: &mut LabelCounter) {
        let count = layout.element_count().max(0);
        emit!(ctx, "mov rdi, {}", count * 8);
        emit!(ctx, "lea rax, qword ptr [rip + malloc]");
        emit!(ctx, "call builtin$callsysv");
        emit!(ctx, "mov qword ptr [{}], rax", registers::LVALUE_PTR);
        emit!(ctx, "push rax");
        emit!(ctx, "mov rcx, 0");
        let top = labels.fresh("ArrayInitLoop");
        let exit = labels.fresh("ArrayInitDone");
        emit!(ctx, "{}:", top);
        emit!(ctx, "cmp rcx, {}", count);
        emit!(ctx, "jge {}", exit);
        emit!(ctx, "mov rax, qword ptr [rsp]");
        emit!(ctx, "lea {}, qword ptr [rax + rcx*8]", registers::LVALUE_PTR);
        layout.element.emit_initialize(ctx, labels);
        emit!(ctx, "inc rcx");
        emit!(ctx, "jmp {}", top);
        emit!(ctx, "{}:", exit);
        emit!(ctx, "add rsp, 8");
    }

    /// Element-level copy from the source buffer to the (reused) destination buffer.
    /// Addressing is the clean `[rcx + rax*8]` derivation described in DESIGN.md,
    /// not a literal port of the source system's redundant format argument.
    fn emit_assign_array(&self, ctx: &mut Emitter, layout: &ArrayLayout, labels: &mut LabelCounter) {
        let count = layout.element_count().max(0);
        emit!(
            ctx,
            "mov {}, qword ptr [{}]",
            registers::FRAME_BASE,
            registers::LVALUE_PTR
        );
        emit!(ctx, "push {}", registers::FRAME_BASE);
        emit!(ctx, "mov rcx, 0");
        let top = labels.fresh("ArrayAssignLoop");
        let exit = labels.fresh("ArrayAssignDone");
        emit!(ctx, "{}:", top);
        emit!(ctx, "cmp rcx, {}", count);
        emit!(ctx, "jge {}", exit);
        emit!(ctx, "mov rax, qword ptr [rsp]");
        emit!(
            ctx,
            "lea {}, qword ptr [rax + rcx*8]",
            registers::LVALUE_PTR
        );
        emit!(ctx, "mov rdx, qword ptr [rsp + 8]");
        emit!(ctx, "mov rax, qword ptr [rdx + rcx*8]");
        emit!(ctx, "push rcx");
        emit!(ctx, "push rax");
        layout.element.emit_assign(ctx, labels);
        emit!(ctx, "pop rcx");
        emit!(ctx, "inc rcx");
        emit!(ctx, "jmp {}", top);
        emit!(ctx, "{}:", exit);
        emit!(ctx, "add rsp, 16");
    }

    fn emit_finalize_array(&self, ctx: &mut Emitter, layout: &ArrayLayout, labels: &mut LabelCounter) {
        let count = layout.element_count().max(0);
        emit!(
            ctx,
            "mov {}, qword ptr [{}]",
            registers::FRAME_BASE,
            registers::LVALUE_PTR
        );
        if layout.element.needs_finalize() {
            emit!(ctx, "push {}", registers::FRAME_BASE);
            emit!(ctx, "mov rcx, 0");
            let top = labels.fresh("ArrayFinalizeLoop");
            let exit = labels.fresh("ArrayFinalizeDone");
            emit!(ctx, "{}:", top);
            emit!(ctx, "cmp rcx, {}", count);
            emit!(ctx, "jge {}", exit);
            emit!(ctx, "mov rax, qword ptr [rsp]");
            emit!(ctx, "lea {}, qword ptr [rax + rcx*8]", registers::LVALUE_PTR);
            emit!(ctx, "push rcx");
            layout.element.emit_finalize(ctx, labels);
            emit!(ctx, "pop rcx");
            emit!(ctx, "inc rcx");
            emit!(ctx, "jmp {}", top);
            emit!(ctx, "{}:", exit);
            emit!(ctx, "pop {}", registers::FRAME_BASE);
        }
        emit!(ctx, "mov rdi, {}", registers::FRAME_BASE);
        emit!(ctx, "lea rax, qword ptr [rip + free]");
        emit!(ctx, "call builtin$callsysv");
    }
}

/// The per-dimension bounds-checked offset computation shared by array l-value
/// emission. Expects one index value already pushed per dimension, dimension 0
/// nearest the top of the stack (see the `ArrayAccess` case in `codegen.rs`).
pub fn emit_array_member_offset(ctx: &mut Emitter, layout: &ArrayLayout) {
    emit!(ctx, "xor rax, rax");
    let mut remaining = layout.element_count();
    for (dim_idx, (min, max)) in layout.bounds.iter().enumerate() {
        remaining /= max - min + 1;
        emit!(ctx, "push {}", min);
        emit!(ctx, "push {}", max);
        emit!(ctx, "push {}", dim_idx + 1);
        emit!(ctx, "call builtin$checkarrayindex");
        emit!(ctx, "add rsp, 24");
        emit!(ctx, "mov rdx, {}", remaining);
        emit!(ctx, "pop rcx");
        emit!(ctx, "sub rcx, {}", min);
        emit!(ctx, "imul rdx, rcx");
        emit!(ctx, "add rax, rdx");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_ty() -> SemanticType {
        SemanticType::Integer
    }

    #[test]
    fn primitive_signatures_are_distinct() {
        assert_ne!(SemanticType::Integer.signature(), SemanticType::Double.signature());
        assert_ne!(SemanticType::Integer.signature(), SemanticType::String.signature());
    }

    #[test]
    fn pointer_signature_nests() {
        let p = SemanticType::Pointer(Box::new(int_ty()));
        assert_eq!(p.signature(), "^integer");
    }

    #[test]
    fn record_signature_reflects_declared_field_order() {
        let r1 = SemanticType::Record(RecordLayout {
            fields: vec![("x".into(), int_ty()), ("y".into(), SemanticType::Double)],
        });
        let r2 = SemanticType::Record(RecordLayout {
            fields: vec![("y".into(), SemanticType::Double), ("x".into(), int_ty())],
        });
        assert_ne!(r1.signature(), r2.signature(), "field order is part of identity");
    }

    #[test]
    fn allowed_pass_by_value_excludes_aggregates() {
        assert!(int_ty().allowed_pass_by_value());
        assert!(SemanticType::Pointer(Box::new(int_ty())).allowed_pass_by_value());
        assert!(!SemanticType::String.allowed_pass_by_value());
        let rec = SemanticType::Record(RecordLayout { fields: vec![] });
        assert!(!rec.allowed_pass_by_value());
    }

    #[test]
    fn needs_finalize_propagates_through_records() {
        let plain = SemanticType::Record(RecordLayout {
            fields: vec![("x".into(), int_ty())],
        });
        assert!(!plain.needs_finalize());

        let with_string = SemanticType::Record(RecordLayout {
            fields: vec![("s".into(), SemanticType::String)],
        });
        assert!(with_string.needs_finalize());
    }

    #[test]
    fn array_always_needs_finalize_even_of_integers() {
        let arr = SemanticType::Array(ArrayLayout {
            bounds: vec![(1, 3)],
            element: Box::new(int_ty()),
        });
        assert!(arr.needs_finalize());
        assert_eq!(arr.signature(), "array[1..3] of integer");
    }

    #[test]
    fn array_element_count_is_product_of_dimensions() {
        let arr = ArrayLayout {
            bounds: vec![(1, 3), (1, 2)],
            element: Box::new(int_ty()),
        };
        assert_eq!(arr.element_count(), 6);
    }

    #[test]
    fn record_assign_never_frees_destination_header() {
        let rec = SemanticType::Record(RecordLayout {
            fields: vec![("x".into(), int_ty())],
        });
        let mut labels = LabelCounter::new();
        let mut ctx = Emitter::new("Test", &mut labels);
        rec.emit_assign(&mut ctx, &mut labels);
        assert!(
            !ctx.code().contains("free"),
            "assign must not reallocate or free the destination's own buffer"
        );
    }
}
