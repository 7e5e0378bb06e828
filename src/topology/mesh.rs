// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::{keys, set, GeneratorContext, InstanceSpec, PortAllocator, Properties, Role};

/// `networks` networks of `brokers_per_network` brokers; broker 0 of each is the main broker
pub(super) fn generate(
    networks: usize,
    brokers_per_network: usize,
    ports: &mut PortAllocator,
    ctx: &GeneratorContext<'_>,
) -> Vec<InstanceSpec> {
    let mut specs = Vec::new();

    for net in 0..networks {
        let main_port = ports.allocate();
        let suffix = format!("{}-0", net);

        let mut props = Properties::new();
        set(&mut props, keys::MAIN_SUFFIX, net);
        set(&mut props, keys::KAHADB_DIR, "main");
        set(&mut props, keys::KAHADB_PREFIX, &suffix);
        set(&mut props, keys::HOSTNAME, ctx.hostname);
        set(&mut props, keys::PORT, main_port);

        specs.push(InstanceSpec::new(
            Role::Main,
            net,
            0,
            &ctx.templates.main,
            &suffix,
            main_port,
            props,
        ));

        for id in 1..brokers_per_network {
            let port = ports.allocate();
            let suffix = format!("{}-{}", net, id);

            let mut props = Properties::new();
            set(&mut props, keys::NETWORK_SUFFIX, id);
            set(&mut props, keys::KAHADB_DIR, "network");
            set(&mut props, keys::KAHADB_PREFIX, &suffix);
            set(&mut props, keys::HOSTNAME, ctx.hostname);
            set(&mut props, keys::PORT, port);
            set(&mut props, keys::NETWORK_HOSTNAME, ctx.hostname);
            set(&mut props, keys::NETWORK_PORT, main_port);

            specs.push(InstanceSpec::new(
                Role::Networked,
                net,
                id,
                &ctx.templates.networked,
                &suffix,
                port,
                props,
            ));
        }
    }

    specs
}
