// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::{keys, set, GeneratorContext, InstanceSpec, PortAllocator, Properties, Role};

/// `hubs` hubs, each followed by its `spokes_per_hub` spokes
pub(super) fn generate(
    hubs: usize,
    spokes_per_hub: usize,
    ports: &mut PortAllocator,
    ctx: &GeneratorContext<'_>,
) -> Vec<InstanceSpec> {
    let mut specs = Vec::new();

    for hub in 0..hubs {
        let hub_port = ports.allocate();

        let mut props = Properties::new();
        set(&mut props, keys::HUB_SUFFIX, hub);
        set(&mut props, keys::KAHADB_DIR, "hub");
        set(&mut props, keys::KAHADB_PREFIX, hub);
        set(&mut props, keys::HUB_HOSTNAME, ctx.hostname);
        set(&mut props, keys::HUB_PORT, hub_port);

        specs.push(InstanceSpec::new(
            Role::Hub,
            hub,
            0,
            &ctx.templates.hub,
            &hub.to_string(),
            hub_port,
            props,
        ));

        for spoke in 0..spokes_per_hub {
            let spoke_port = ports.allocate();
            let suffix = format!("{}-{}", hub, spoke);

            let mut props = Properties::new();
            set(&mut props, keys::SPOKE_SUFFIX, &suffix);
            set(&mut props, keys::KAHADB_DIR, "spoke");
            set(&mut props, keys::KAHADB_PREFIX, &suffix);
            set(&mut props, keys::HUB_HOSTNAME, ctx.hostname);
            set(&mut props, keys::HUB_PORT, hub_port);
            set(&mut props, keys::SPOKE_HOSTNAME, ctx.hostname);
            set(&mut props, keys::SPOKE_PORT, spoke_port);

            specs.push(InstanceSpec::new(
                Role::Spoke,
                hub,
                spoke,
                &ctx.templates.spoke,
                &suffix,
                spoke_port,
                props,
            ));
        }
    }

    specs
}

#[cfg(test)]
mod tests {
    use super::super::tests::{assert_distinct_ports, generate};
    use super::super::{keys, Role, Topology};

    #[test]
    fn test_spokes_reference_owning_hub() {
        let specs = generate(
            Topology::HubSpoke {
                hubs: 3,
                spokes_per_hub: 4,
            },
            61616,
        );
        assert_eq!(specs.len(), 3 + 3 * 4);
        assert_distinct_ports(&specs);

        let hubs: Vec<_> = specs.iter().filter(|s| s.role() == Role::Hub).collect();
        assert_eq!(hubs.len(), 3);

        for spoke in specs.iter().filter(|s| s.role() == Role::Spoke) {
            let hub = hubs[spoke.group()];
            assert_eq!(
                spoke.property(keys::HUB_PORT),
                Some(&*hub.listen_port().to_string())
            );
            assert_eq!(
                spoke.property(keys::KAHADB_PREFIX),
                Some(&*format!("{}-{}", spoke.group(), spoke.index()))
            );
        }
    }

    #[test]
    fn test_hub_precedes_its_spokes() {
        let specs = generate(
            Topology::HubSpoke {
                hubs: 2,
                spokes_per_hub: 2,
            },
            1000,
        );

        let roles: Vec<Role> = specs.iter().map(|s| s.role()).collect();
        assert_eq!(
            roles,
            vec![
                Role::Hub,
                Role::Spoke,
                Role::Spoke,
                Role::Hub,
                Role::Spoke,
                Role::Spoke
            ]
        );
        assert_eq!(specs[4].identifier(), "spoke-1-0");
        assert_eq!(specs[4].property(keys::HUB_PORT), Some("1003"));
    }

    #[test]
    fn test_hub_without_spokes() {
        let specs = generate(
            Topology::HubSpoke {
                hubs: 2,
                spokes_per_hub: 0,
            },
            1000,
        );

        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.role() == Role::Hub));
    }
}
