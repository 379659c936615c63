//! Candidate bookkeeping for code flushing.
//!
//! Candidates are collected during marking and resolved after it. The
//! lists are intrusive and zero-allocation: the link word of a candidate
//! function is its code-entry word, and the link word of a candidate
//! shared function info is the header-padding word of its code object.
//! Both words are dead weight while the candidate is on a list: the
//! function's entry is restored (or redirected to the lazy-compile stub)
//! when the candidates are processed, and the padding word is never read
//! by anything else.

use crate::heap::Heap;
use crate::object::{Code, JsFunction, SharedFunctionInfo};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::Address;

// The padding word must be inside the fixed code header.
static_assertions::const_assert!(Code::HEADER_PADDING_OFFSET + BYTES_IN_WORD <= Code::HEADER_SIZE);

#[derive(Default)]
pub struct CodeFlusher {
    jsfunction_candidates_head: usize,
    shared_function_info_candidates_head: usize,
}

impl CodeFlusher {
    pub fn new() -> CodeFlusher {
        CodeFlusher::default()
    }

    fn function_link_slot(candidate: JsFunction) -> Address {
        candidate.code_entry_slot()
    }

    fn shared_link_slot(candidate: SharedFunctionInfo) -> Address {
        candidate.code().object().raw_field(Code::HEADER_PADDING_OFFSET)
    }

    /// Prepend a function candidate. Its code-entry word becomes the list
    /// link until `process_candidates` runs.
    pub fn add_function_candidate(&mut self, candidate: JsFunction) {
        debug_assert!(candidate.code() == candidate.shared().code());
        unsafe {
            Self::function_link_slot(candidate).store::<usize>(self.jsfunction_candidates_head);
        }
        self.jsfunction_candidates_head = candidate.object().address().as_usize();
    }

    /// Prepend a shared-info candidate, linked through its code object's
    /// padding word.
    pub fn add_shared_candidate(&mut self, candidate: SharedFunctionInfo) {
        unsafe {
            Self::shared_link_slot(candidate)
                .store::<usize>(self.shared_function_info_candidates_head);
        }
        self.shared_function_info_candidates_head = candidate.object().address().as_usize();
    }

    pub fn has_candidates(&self) -> bool {
        self.jsfunction_candidates_head != 0 || self.shared_function_info_candidates_head != 0
    }

    /// Resolve every candidate: code still unmarked at this point is
    /// replaced by the lazy-compile stub, everything else is restored.
    pub fn process_candidates(&mut self, heap: &Heap) {
        self.process_shared_function_info_candidates(heap);
        self.process_js_function_candidates(heap);
    }

    fn process_js_function_candidates(&mut self, heap: &Heap) {
        let lazy_compile = Code::from_object(heap.lazy_compile_stub().to_object());

        let mut candidate = self.jsfunction_candidates_head;
        while candidate != 0 {
            let function =
                JsFunction::from_object(crate::object::HeapObject::from_address(unsafe {
                    Address::from_usize(candidate)
                }));
            let next = unsafe { Self::function_link_slot(function).load::<usize>() };

            let shared = function.shared();
            let code = shared.code();
            if !heap.is_marked(code.object()) {
                shared.set_code(lazy_compile);
                function.set_code(lazy_compile);
            } else {
                function.set_code(shared.code());
            }

            candidate = next;
        }

        self.jsfunction_candidates_head = 0;
    }

    fn process_shared_function_info_candidates(&mut self, heap: &Heap) {
        let lazy_compile = Code::from_object(heap.lazy_compile_stub().to_object());

        let mut candidate = self.shared_function_info_candidates_head;
        while candidate != 0 {
            let shared =
                SharedFunctionInfo::from_object(crate::object::HeapObject::from_address(unsafe {
                    Address::from_usize(candidate)
                }));
            let next = unsafe { Self::shared_link_slot(shared).load::<usize>() };
            unsafe { Self::shared_link_slot(shared).store::<usize>(0) };

            let code = shared.code();
            if !heap.is_marked(code.object()) {
                shared.set_code(lazy_compile);
            }

            candidate = next;
        }

        self.shared_function_info_candidates_head = 0;
    }
}
