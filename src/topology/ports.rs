// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// Hands out listening ports sequentially from a starting port
///
/// One allocator is owned by one topology generation, never shared.
#[derive(Clone, Debug)]
pub struct PortAllocator {
    next: u16,
}

impl PortAllocator {
    pub fn new(base_port: u16) -> Self {
        Self { next: base_port }
    }

    /// The port the next call to `allocate` will return
    pub fn peek(&self) -> u16 {
        self.next
    }

    pub fn allocate(&mut self) -> u16 {
        let port = self.next;
        // Topology::validate keeps the range in bounds
        self.next = self.next.wrapping_add(1);
        port
    }
}
