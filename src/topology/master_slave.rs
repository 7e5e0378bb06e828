// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::{keys, set, GeneratorContext, InstanceSpec, PortAllocator, Properties, Role};

/// `pairs` master/slave pairs, each master is generated before the slave that references it
pub(super) fn generate(
    pairs: usize,
    ports: &mut PortAllocator,
    ctx: &GeneratorContext<'_>,
) -> Vec<InstanceSpec> {
    let mut specs = Vec::new();

    for id in 0..pairs {
        let master_port = ports.allocate();

        let mut props = Properties::new();
        set(&mut props, keys::MASTER_SUFFIX, id);
        set(&mut props, keys::KAHADB_DIR, "master");
        set(&mut props, keys::KAHADB_PREFIX, id);
        set(&mut props, keys::MASTER_HOSTNAME, ctx.hostname);
        set(&mut props, keys::MASTER_PORT, master_port);

        specs.push(InstanceSpec::new(
            Role::Master,
            id,
            0,
            &ctx.templates.master,
            &id.to_string(),
            master_port,
            props,
        ));

        let slave_port = ports.allocate();

        // the kahadb.dir keeps the slave's store apart from its master's
        let mut props = Properties::new();
        set(&mut props, keys::SLAVE_SUFFIX, id);
        set(&mut props, keys::KAHADB_DIR, "slave");
        set(&mut props, keys::KAHADB_PREFIX, id);
        set(&mut props, keys::MASTER_HOSTNAME, ctx.hostname);
        set(&mut props, keys::MASTER_PORT, master_port);
        set(&mut props, keys::SLAVE_HOSTNAME, ctx.hostname);
        set(&mut props, keys::SLAVE_PORT, slave_port);

        specs.push(InstanceSpec::new(
            Role::Slave,
            id,
            1,
            &ctx.templates.slave,
            &id.to_string(),
            slave_port,
            props,
        ));
    }

    specs
}
