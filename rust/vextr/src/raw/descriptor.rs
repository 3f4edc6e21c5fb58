use bitflags::bitflags;

bitflags! {
    /// State bits kept next to the capacity of a buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DescriptorFlags: u8 {
        /// The live array was allocated from the heap and is owned by the buffer.
        const DYNAMIC = 0b0001;
        /// The live array is the embedded array of the owning container.
        const EMBEDDED_IN_USE = 0b0010;
        /// The owning container declares an embedded array.
        const HAS_EMBEDDED = 0b0100;
        /// The item right past the last one is zero.
        const NUL_TERMINATED = 0b1000;
    }
}

/// Capacity and state flags of a buffer.
///
/// The capacity is a plain field; flags live in their own byte, so the two can never
/// overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor {
    pub(crate) capacity: usize,
    pub(crate) flags: DescriptorFlags,
}

impl Descriptor {
    pub const fn new(capacity: usize, flags: DescriptorFlags) -> Descriptor {
        Descriptor { capacity, flags }
    }

    /// Slots in the live array; zero for read-only and missing arrays.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flags(&self) -> DescriptorFlags {
        self.flags
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(DescriptorFlags::DYNAMIC)
    }

    pub fn is_embedded_in_use(&self) -> bool {
        self.flags.contains(DescriptorFlags::EMBEDDED_IN_USE)
    }

    pub fn has_embedded(&self) -> bool {
        self.flags.contains(DescriptorFlags::HAS_EMBEDDED)
    }

    pub fn is_nul_terminated(&self) -> bool {
        self.flags.contains(DescriptorFlags::NUL_TERMINATED)
    }
}
