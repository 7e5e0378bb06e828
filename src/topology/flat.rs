// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::{keys, set, GeneratorContext, InstanceSpec, PortAllocator, Properties, Role};

/// `count` independent brokers, broker `i` listens on `base + i`
pub(super) fn generate(
    count: usize,
    ports: &mut PortAllocator,
    ctx: &GeneratorContext<'_>,
) -> Vec<InstanceSpec> {
    (0..count)
        .map(|id| {
            let port = ports.allocate();

            let mut props = Properties::new();
            set(&mut props, keys::ACTIVEMQ_SUFFIX, id);
            set(&mut props, keys::KAHADB_DIR, &ctx.templates.broker);
            set(&mut props, keys::KAHADB_PREFIX, id);
            set(&mut props, keys::HOSTNAME, ctx.hostname);
            set(&mut props, keys::PORT, port);

            InstanceSpec::new(
                Role::Solo,
                id,
                id,
                &ctx.templates.broker,
                &id.to_string(),
                port,
                props,
            )
        })
        .collect()
}
