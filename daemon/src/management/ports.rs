use bedrock_protocol::management::instance::PortPair;

/// Ports are handed out in steps of two so that v4 and v6 stay interleaved.
pub const PORT_STEP: u16 = 2;

/// The instance that is never renumbered.
pub const AUTHORITATIVE_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAssignment {
    pub id: u32,
    pub ports: PortPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortOverflow {
    pub id: u32,
    pub after: PortPair,
}

/// Works out which instances must move to new ports.
///
/// `instances` is the fleet in its iteration order. Every instance sharing
/// either port with another one is in conflict, except the authoritative
/// instance. The remaining instances form the settled list; each conflicting
/// instance, in fleet order, takes the ports of the current settled tail plus
/// [`PORT_STEP`] and becomes the new tail.
///
/// When nothing is settled, the first conflicting instance keeps its ports and
/// anchors the cascade.
pub fn plan_port_fixes(instances: &[(u32, PortPair)]) -> Result<Vec<PortAssignment>, PortOverflow> {
    let conflicting = instances
        .iter()
        .enumerate()
        .filter(|(i, (id, ports))| {
            *id != AUTHORITATIVE_ID
                && instances
                    .iter()
                    .enumerate()
                    .any(|(j, (_, other))| *i != j && ports.overlaps(other))
        })
        .map(|(i, _)| i)
        .collect::<Vec<_>>();

    let mut tail = instances
        .iter()
        .enumerate()
        .filter(|(i, _)| !conflicting.contains(i))
        .map(|(_, (_, ports))| *ports)
        .last();

    let mut assignments = Vec::with_capacity(conflicting.len());
    for i in conflicting {
        let (id, current) = instances[i];
        let ports = match tail {
            Some(settled) => settled
                .checked_offset(PORT_STEP)
                .ok_or(PortOverflow { id, after: settled })?,
            None => current,
        };
        assignments.push(PortAssignment { id, ports });
        tail = Some(ports);
    }
    Ok(assignments)
}
